use std::{
    alloc::Layout,
    ptr::NonNull,
    sync::atomic::{AtomicBool, Ordering},
};

use util::CACHE_LINE;

#[cfg(target_os = "linux")]
const HUGE_PAGE: usize = 2 << 20;

static FALLBACK_LOGGED: AtomicBool = AtomicBool::new(false);

/// A zeroed, cache-line aligned allocation of f32 samples.
pub(crate) struct Slab {
    ptr: NonNull<f32>,
    len: usize,
    backing: Backing,
}

enum Backing {
    Heap(Layout),
    #[cfg(target_os = "linux")]
    HugePages(usize),
}

unsafe impl Send for Slab {}
unsafe impl Sync for Slab {}

impl Slab {
    /// Allocate `len` samples. When `hugepages` is set, try to back the slab with huge pages
    /// first and silently fall back to the regular allocator (logging once per process).
    pub(crate) fn new(len: usize, hugepages: bool) -> Self {
        let len = len.max(1);
        if hugepages {
            #[cfg(target_os = "linux")]
            {
                if let Some(slab) = Self::huge(len) {
                    return slab;
                }
            }
            if !FALLBACK_LOGGED.swap(true, Ordering::Relaxed) {
                tracing::info!("huge pages unavailable, using aligned heap allocation for audio buffers");
            }
        }
        Self::heap(len)
    }

    fn heap(len: usize) -> Self {
        let layout = Layout::from_size_align(len * size_of::<f32>(), CACHE_LINE)
            .expect("audio arena larger than isize::MAX");
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr.cast::<f32>()) else {
            std::alloc::handle_alloc_error(layout)
        };
        Self {
            ptr,
            len,
            backing: Backing::Heap(layout),
        }
    }

    #[cfg(target_os = "linux")]
    fn huge(len: usize) -> Option<Self> {
        let bytes = (len * size_of::<f32>()).div_ceil(HUGE_PAGE) * HUGE_PAGE;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_HUGETLB,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return None;
        }
        let ptr = NonNull::new(ptr.cast::<f32>())?;
        Some(Self {
            ptr,
            len,
            backing: Backing::HugePages(bytes),
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut f32 {
        self.ptr.as_ptr()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_huge(&self) -> bool {
        match self.backing {
            Backing::Heap(_) => false,
            #[cfg(target_os = "linux")]
            Backing::HugePages(_) => true,
        }
    }
}

impl Drop for Slab {
    fn drop(&mut self) {
        match self.backing {
            Backing::Heap(layout) => unsafe {
                std::alloc::dealloc(self.ptr.as_ptr().cast(), layout);
            },
            #[cfg(target_os = "linux")]
            Backing::HugePages(bytes) => unsafe {
                libc::munmap(self.ptr.as_ptr().cast(), bytes);
            },
        }
    }
}
