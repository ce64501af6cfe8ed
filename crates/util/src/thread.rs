//! Scheduling helpers for threads that sit on the audio path.

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("pthread_setschedparam({name}, prio {priority}) failed with errno {errno}")]
    SetParam {
        name: String,
        priority: i32,
        errno: i32,
    },
    #[error("realtime verification failed for {name}: policy {policy}, prio {priority}")]
    Verify {
        name: String,
        policy: i32,
        priority: i32,
    },
    #[error("realtime thread priority is not supported on this platform")]
    Unsupported,
}

/// Move the calling thread to SCHED_FIFO at `priority`.
///
/// This commonly fails for unprivileged users. Callers log the error and keep running with
/// normal scheduling.
pub fn promote_to_realtime(name: &str, priority: i32) -> Result<(), RealtimeError> {
    #[cfg(unix)]
    {
        let thread = unsafe { libc::pthread_self() };
        let param = libc::sched_param {
            sched_priority: priority,
        };
        let rc = unsafe { libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param) };
        if rc != 0 {
            return Err(RealtimeError::SetParam {
                name: name.to_owned(),
                priority,
                errno: rc,
            });
        }

        let mut policy = 0_i32;
        let mut actual = libc::sched_param { sched_priority: 0 };
        let rc = unsafe { libc::pthread_getschedparam(thread, &mut policy, &mut actual) };
        if rc != 0 || policy != libc::SCHED_FIFO || actual.sched_priority != priority {
            return Err(RealtimeError::Verify {
                name: name.to_owned(),
                policy,
                priority: actual.sched_priority,
            });
        }
        tracing::debug!("{name}: running with SCHED_FIFO priority {priority}");
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = (name, priority);
        Err(RealtimeError::Unsupported)
    }
}
