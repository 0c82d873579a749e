//! Transport boundary towards the board's serial monitor
//!
//! The engine only needs blocking reads bounded by a per-handle timeout,
//! blocking writes, and the ability to change the timeout and baud rate.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crate::error::Result;

/// Byte transport to the monitor (serial port in production)
pub trait Transport {
    /// Write all bytes
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes
    ///
    /// Blocks for at most the current timeout. Returns `Ok(0)` when the
    /// timeout elapsed without data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Like [`read`](Transport::read), but blocks for at most `limit`
    ///
    /// Shortens the timeout for this one read when `limit` is below it and
    /// restores it afterwards.
    fn read_within(&mut self, buf: &mut [u8], limit: Duration) -> Result<usize> {
        let timeout = self.timeout();
        if limit >= timeout {
            return self.read(buf);
        }
        self.set_timeout(limit)?;
        let result = self.read(buf);
        let restored = self.set_timeout(timeout);
        let n = result?;
        restored?;
        Ok(n)
    }

    /// Current read timeout
    fn timeout(&self) -> Duration;

    /// Change the read timeout
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Change the line speed
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn read_within(&mut self, buf: &mut [u8], limit: Duration) -> Result<usize> {
        (**self).read_within(buf, limit)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        (**self).set_baud_rate(baud)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn read_within(&mut self, buf: &mut [u8], limit: Duration) -> Result<usize> {
        (**self).read_within(buf, limit)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        (**self).set_baud_rate(baud)
    }
}

/// Temporarily overrides the transport timeout
///
/// The previous timeout is restored when the guard is dropped, whether the
/// guarded operation succeeded or not.
pub struct TimeoutGuard<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    previous: Option<Duration>,
}

impl<'a, T: Transport + ?Sized> TimeoutGuard<'a, T> {
    /// Apply `timeout` (if any) until the guard goes out of scope
    pub fn new(transport: &'a mut T, timeout: Option<Duration>) -> Result<Self> {
        let previous = match timeout {
            Some(timeout) => {
                let previous = transport.timeout();
                transport.set_timeout(timeout)?;
                log::trace!("Timeout {:?} -> {:?}", previous, timeout);
                Some(previous)
            }
            None => None,
        };
        Ok(Self {
            transport,
            previous,
        })
    }
}

impl<T: Transport + ?Sized> Deref for TimeoutGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.transport
    }
}

impl<T: Transport + ?Sized> DerefMut for TimeoutGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.transport
    }
}

impl<T: Transport + ?Sized> Drop for TimeoutGuard<'_, T> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(e) = self.transport.set_timeout(previous) {
                log::warn!("Failed to restore transport timeout: {}", e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory transport

    use super::*;
    use std::collections::VecDeque;

    /// Emits canned monitor output whenever the host has written a trigger
    pub struct MockTransport {
        /// Bytes waiting to be read
        pub pending: VecDeque<u8>,
        /// Every write, in order
        pub writes: Vec<Vec<u8>>,
        /// Concatenation of all writes
        pub written: Vec<u8>,
        /// Every timeout change, in order
        pub timeout_log: Vec<Duration>,
        /// Every baud change, in order
        pub baud_log: Vec<u32>,
        rules: VecDeque<(Vec<u8>, Vec<u8>)>,
        cursor: usize,
        timeout: Duration,
    }

    impl MockTransport {
        pub fn new(timeout: Duration) -> Self {
            Self {
                pending: VecDeque::new(),
                writes: Vec::new(),
                written: Vec::new(),
                timeout_log: Vec::new(),
                baud_log: Vec::new(),
                rules: VecDeque::new(),
                cursor: 0,
                timeout,
            }
        }

        /// Make `output` readable right away
        pub fn output(mut self, output: &str) -> Self {
            self.pending.extend(output.as_bytes());
            self
        }

        /// Emit `output` once the host wrote `trigger` (rules fire in order)
        pub fn on_write(mut self, trigger: &[u8], output: &str) -> Self {
            self.rules
                .push_back((trigger.to_vec(), output.as_bytes().to_vec()));
            self
        }

        fn fire_rules(&mut self) {
            while let Some((trigger, _)) = self.rules.front() {
                let haystack = &self.written[self.cursor..];
                let found = haystack
                    .windows(trigger.len())
                    .position(|w| w == trigger.as_slice());
                match found {
                    Some(pos) => {
                        self.cursor += pos + trigger.len();
                        if let Some((_, output)) = self.rules.pop_front() {
                            self.pending.extend(output);
                        }
                    }
                    None => break,
                }
            }
        }
    }

    impl Transport for MockTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.writes.push(data.to_vec());
            self.written.extend_from_slice(data);
            self.fire_rules();
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.pending.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            if n == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(n)
        }

        // Never blocks long enough to need a shorter timeout
        fn read_within(&mut self, buf: &mut [u8], _limit: Duration) -> Result<usize> {
            self.read(buf)
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            self.timeout_log.push(timeout);
            Ok(())
        }

        fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
            self.baud_log.push(baud);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    #[test]
    fn test_guard_restores_timeout() {
        let mut transport = MockTransport::new(Duration::from_secs(20));
        {
            let guard = TimeoutGuard::new(&mut transport, Some(Duration::from_secs(60))).unwrap();
            assert_eq!(guard.timeout(), Duration::from_secs(60));
        }
        assert_eq!(transport.timeout(), Duration::from_secs(20));
        assert_eq!(
            transport.timeout_log,
            vec![Duration::from_secs(60), Duration::from_secs(20)]
        );
    }

    #[test]
    fn test_guard_without_override_is_noop() {
        let mut transport = MockTransport::new(Duration::from_secs(20));
        drop(TimeoutGuard::new(&mut transport, None).unwrap());
        assert!(transport.timeout_log.is_empty());
    }
}
