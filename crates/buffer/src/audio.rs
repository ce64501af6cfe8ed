//! Audio buffer types.
//!
//! - [Arena]: owns every sample buffer used during playback. Sized once, never grows.
//! - [Audio]: non-owned, multi-channel view of sample memory.
//!
//! A track's full-length buffer and the per-period sub-slices handed to plugins are both
//! [Audio] views over the same arena memory; re-pointing a view ([Audio::assign_range]) copies
//! channel pointers, never samples.
use std::{
    marker::PhantomData,
    ops::{Index, IndexMut},
    ptr::null_mut,
};

use util::{
    CACHE_LINE,
    collections::{Array, Stack},
};

use crate::slab::Slab;

/// Number of f32 samples per cache line. Channel strides are rounded up to this.
const FRAMES_PER_LINE: usize = CACHE_LINE / size_of::<f32>();

pub struct Arena {
    slab: Slab,
    max_num_channels: usize,
    stride: usize,
    max_num_frames: usize,
    stack: Stack<*mut f32>,
}

pub struct Audio {
    num_channels: u32,
    num_frames: u32,
    channels: Array<*mut f32>,
}

pub struct AudioIter<'a> {
    channels: *const *mut f32,
    num_frames: usize,
    num_channels: usize,
    _p: PhantomData<&'a ()>,
}

pub struct AudioIterMut<'a> {
    channels: *const *mut f32,
    num_frames: usize,
    num_channels: usize,
    _p: PhantomData<&'a mut ()>,
}

unsafe impl Send for Arena {}

impl Arena {
    /// Create a new audio buffer allocator holding `max_num_channels` channels of
    /// `max_num_frames` samples each. Every channel starts on its own cache line.
    pub fn new(max_num_channels: usize, max_num_frames: usize, hugepages: bool) -> Self {
        let stride = max_num_frames.div_ceil(FRAMES_PER_LINE).max(1) * FRAMES_PER_LINE;
        let slab = Slab::new(max_num_channels * stride, hugepages);
        let mut this = Self {
            slab,
            max_num_channels,
            stride,
            max_num_frames,
            stack: Stack::new(max_num_channels),
        };
        this.reset();
        this
    }

    /// Return every channel to the free list. Views handed out earlier become dangling in the
    /// logical sense (they still point into the slab) and must be re-acquired.
    pub fn reset(&mut self) {
        self.stack.clear();
        // Push in reverse so that channels are handed out in address order.
        for idx in (0..self.max_num_channels).rev() {
            let channel = unsafe { self.slab.as_ptr().add(idx * self.stride) };
            let pushed = self.stack.push(channel);
            debug_assert!(pushed.is_ok());
        }
    }

    /// Bind every channel of `audio` to a fresh arena channel, sized to the maximum frame count.
    /// Returns false (leaving `audio` partially bound) if the arena is exhausted.
    pub fn acquire(&mut self, audio: &mut Audio) -> bool {
        for idx in 0..audio.channels.len() {
            let Some(channel) = self.stack.pop() else {
                return false;
            };
            audio.channels[idx] = channel;
        }
        audio.num_frames = self.max_num_frames as u32;
        true
    }

    /// Return the channels of `audio` to the arena and unbind the view.
    pub fn release(&mut self, audio: &mut Audio) {
        for idx in 0..audio.channels.len() {
            let channel = std::mem::replace(&mut audio.channels[idx], null_mut());
            if !channel.is_null() {
                let pushed = self.stack.push(channel);
                debug_assert!(pushed.is_ok(), "released a channel the arena does not own");
            }
        }
        audio.num_frames = 0;
    }

    /// Number of channels not currently handed out.
    pub fn available(&self) -> usize {
        self.stack.len()
    }

    pub fn max_num_frames(&self) -> usize {
        self.max_num_frames
    }

    /// Distance in samples between the starts of two consecutive channels.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn uses_hugepages(&self) -> bool {
        self.slab.is_huge()
    }
}

impl Audio {
    /// Create a new unbound view with room for `num_channels` channel pointers.
    pub fn new(num_channels: u32) -> Self {
        Self {
            num_channels,
            num_frames: 0,
            channels: Array::filled(num_channels as usize, null_mut()),
        }
    }

    /// Build a view over caller-owned channel pointers.
    ///
    /// # Safety
    /// `channels` must point to `num_channels` pointers, each valid for `num_frames` samples for
    /// as long as the view is used.
    pub unsafe fn from_raw(channels: *const *mut f32, num_channels: u32, num_frames: u32) -> Self {
        let mut this = Self::new(num_channels);
        this.num_frames = num_frames;
        for i in 0..num_channels as usize {
            this.channels[i] = unsafe { *channels.add(i) };
        }
        this
    }

    /// Get the number of channels in the buffer.
    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }

    /// Return the number of frames per channel.
    pub fn num_frames(&self) -> u32 {
        self.num_frames
    }

    /// True when every channel points at memory.
    pub fn is_bound(&self) -> bool {
        self.channels.iter().all(|ptr| !ptr.is_null())
    }

    /// Point this view at the same memory as `other`.
    pub fn assign_to(&mut self, other: &Self) {
        let len = self.channels.len().min(other.channels.len());
        self.num_channels = len as u32;
        self.num_frames = other.num_frames;
        self.channels.as_mut_slice()[0..len].copy_from_slice(&other.channels.as_slice()[0..len]);
    }

    /// Point this view at frames `offset..offset + num_frames` of `other`.
    pub fn assign_range(&mut self, other: &Self, offset: u32, num_frames: u32) {
        debug_assert!(
            offset + num_frames <= other.num_frames,
            "range {offset}+{num_frames} exceeds {} frames",
            other.num_frames
        );
        self.assign_to(other);
        for channel in self.channels.iter_mut() {
            *channel = unsafe { channel.add(offset as usize) };
        }
        self.num_frames = num_frames;
    }

    /// Silence every channel.
    pub fn clear(&mut self) {
        for channel in self.iter_mut() {
            channel.fill(0.0);
        }
    }

    /// Multiply every sample by `gain`.
    pub fn scale(&mut self, gain: f32) {
        for channel in self.iter_mut() {
            channel.iter_mut().for_each(|s| *s *= gain);
        }
    }

    /// Accumulate `gain * other` into this buffer. Channels beyond the narrower of the two
    /// buffers are ignored; a mono source is spread over every destination channel.
    pub fn add_from(&mut self, other: &Self, gain: f32) {
        let num_frames = self.num_frames.min(other.num_frames) as usize;
        let num_src = other.num_channels as usize;
        if num_src == 0 {
            return;
        }
        for (idx, dst) in self.iter_mut().enumerate() {
            if num_src != 1 && idx >= num_src {
                break;
            }
            let src = &other[idx.min(num_src - 1)];
            for (d, s) in dst[..num_frames].iter_mut().zip(&src[..num_frames]) {
                *d += *s * gain;
            }
        }
    }

    /// Overwrite this buffer with `other`.
    pub fn copy_from(&mut self, other: &Self) {
        let num_frames = self.num_frames.min(other.num_frames) as usize;
        for (dst, src) in self.iter_mut().zip(other.iter()) {
            dst[..num_frames].copy_from_slice(&src[..num_frames]);
        }
    }

    /// Iterate channels.
    pub fn iter(&self) -> AudioIter<'_> {
        AudioIter {
            channels: self.channels.as_ptr(),
            num_channels: self.num_channels as usize,
            num_frames: self.num_frames as usize,
            _p: PhantomData,
        }
    }

    pub fn iter_mut(&mut self) -> AudioIterMut<'_> {
        AudioIterMut {
            channels: self.channels.as_ptr(),
            num_channels: self.num_channels as usize,
            num_frames: self.num_frames as usize,
            _p: PhantomData,
        }
    }
}

impl<Idx> Index<Idx> for Audio
where
    Idx: TryInto<usize>,
{
    type Output = [f32];
    fn index(&self, index: Idx) -> &Self::Output {
        let index = util::cast_usize!(index);
        assert!(index < self.num_channels as usize, "channel {index} out of range");
        let ptr = self.channels[index];
        debug_assert!(!ptr.is_null(), "channel {index} is not bound");
        unsafe { std::slice::from_raw_parts(ptr, self.num_frames as usize) }
    }
}

impl<Idx> IndexMut<Idx> for Audio
where
    Idx: TryInto<usize>,
{
    fn index_mut(&mut self, index: Idx) -> &mut Self::Output {
        let index = util::cast_usize!(index);
        assert!(index < self.num_channels as usize, "channel {index} out of range");
        let ptr = self.channels[index];
        debug_assert!(!ptr.is_null(), "channel {index} is not bound");
        unsafe { std::slice::from_raw_parts_mut(ptr, self.num_frames as usize) }
    }
}

impl<'a> IntoIterator for &'a Audio {
    type IntoIter = AudioIter<'a>;
    type Item = &'a [f32];
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &'a mut Audio {
    type IntoIter = AudioIterMut<'a>;
    type Item = &'a mut [f32];
    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<'a> Iterator for AudioIter<'a> {
    type Item = &'a [f32];
    fn next(&mut self) -> Option<Self::Item> {
        (self.num_channels > 0).then(|| unsafe {
            let slice = std::slice::from_raw_parts(*self.channels, self.num_frames);
            self.channels = self.channels.add(1);
            self.num_channels -= 1;
            slice
        })
    }
}

impl<'a> Iterator for AudioIterMut<'a> {
    type Item = &'a mut [f32];
    fn next(&mut self) -> Option<Self::Item> {
        (self.num_channels > 0).then(|| unsafe {
            let slice = std::slice::from_raw_parts_mut(*self.channels, self.num_frames);
            self.channels = self.channels.add(1);
            self.num_channels -= 1;
            slice
        })
    }
}

unsafe impl Send for Audio {}

#[cfg(test)]
mod tests {
    use super::{Arena, Audio};
    use util::CACHE_LINE;

    #[test]
    fn channels_are_cache_aligned() {
        let mut arena = Arena::new(4, 100, false);
        assert_eq!(arena.stride() % (CACHE_LINE / 4), 0);
        let mut audio = Audio::new(2);
        assert!(arena.acquire(&mut audio));
        assert_eq!(audio.num_frames(), 100);
        for channel in &audio {
            assert_eq!(channel.as_ptr() as usize % CACHE_LINE, 0);
        }
        assert_eq!(arena.available(), 2);
        arena.release(&mut audio);
        assert_eq!(arena.available(), 4);
        assert!(!audio.is_bound());
    }

    #[test]
    fn exhausted_arena_refuses() {
        let mut arena = Arena::new(3, 16, false);
        let mut a = Audio::new(2);
        let mut b = Audio::new(2);
        assert!(arena.acquire(&mut a));
        assert!(!arena.acquire(&mut b));
    }

    #[test]
    fn sub_ranges_share_memory() {
        let mut arena = Arena::new(2, 64, false);
        let mut full = Audio::new(2);
        assert!(arena.acquire(&mut full));
        let mut view = Audio::new(2);
        view.assign_range(&full, 16, 8);
        assert_eq!(view.num_frames(), 8);
        for channel in &mut view {
            channel.fill(1.0);
        }
        assert_eq!(full[0][15], 0.0);
        assert_eq!(full[0][16], 1.0);
        assert_eq!(full[1][23], 1.0);
        assert_eq!(full[1][24], 0.0);
    }

    #[test]
    fn add_from_spreads_mono() {
        let mut arena = Arena::new(3, 8, false);
        let mut stereo = Audio::new(2);
        let mut mono = Audio::new(1);
        assert!(arena.acquire(&mut stereo));
        assert!(arena.acquire(&mut mono));
        mono[0].fill(0.5);
        stereo.add_from(&mono, 2.0);
        stereo.add_from(&mono, 1.0);
        assert!(stereo[0].iter().all(|s| *s == 1.5));
        assert!(stereo[1].iter().all(|s| *s == 1.5));
        stereo.scale(2.0);
        assert_eq!(stereo[1][7], 3.0);
        stereo.clear();
        assert_eq!(stereo[0][0], 0.0);
    }
}
