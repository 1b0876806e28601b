//! Periodic hardware interrupt wakeup source (Linux RTC)
//!
//! The RTC character device delivers one fixed-size record per periodic
//! interrupt from a blocking read. The device only supports power-of-two
//! interrupt rates, so the configured period is quantized down before the
//! frequency is programmed. Not every kernel/target supports this; any
//! setup failure aborts the run cleanly instead of crashing.

use std::ffi::CString;
use std::io::{self, Error, ErrorKind};
use std::os::unix::io::RawFd;

use crate::sampler::engine::TickTarget;
use crate::sampler::wakeup::RunControl;

// Request codes from linux/rtc.h: _IO('p', 0x05), _IO('p', 0x06) and
// _IOW('p', 0x0c, unsigned long), with the size field matching c_ulong.
const RTC_PIE_ON: libc::c_ulong = 0x7005;
const RTC_PIE_OFF: libc::c_ulong = 0x7006;
const RTC_IRQP_SET: libc::c_ulong = (1 << 30)
    | ((std::mem::size_of::<libc::c_ulong>() as libc::c_ulong) << 16)
    | (0x70 << 8)
    | 0x0c;

/// The RTC's base periodic rate; the programmed frequency is 1024 divided
/// by the quantized period in milliseconds.
const RTC_BASE_HZ: u64 = 1024;

/// Quantize a wakeup period down to the nearest supported power-of-two
/// millisecond value, capped at 64 ms.
pub fn quantize_period_ms(period_millis: u64) -> u64 {
    for supported in [64, 32, 16, 8, 4, 2] {
        if period_millis >= supported {
            return supported;
        }
    }
    1
}

/// Read-only handle on the periodic-interrupt device. Interrupts are
/// disabled and the descriptor closed on drop, on error paths included.
pub struct RtcDevice {
    fd: RawFd,
}

impl RtcDevice {
    pub fn open(path: &str) -> io::Result<Self> {
        let c_path = CString::new(path)
            .map_err(|_| Error::new(ErrorKind::InvalidInput, "device path contains NUL"))?;
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY) };
        if fd < 0 {
            let err = Error::last_os_error();
            return Err(Error::new(
                err.kind(),
                format!("failed to open RTC device {path}: {err}"),
            ));
        }
        Ok(Self { fd })
    }

    /// Program the periodic interrupt frequency in Hz.
    pub fn set_periodic_hz(&self, hz: u64) -> io::Result<()> {
        let rc = unsafe { libc::ioctl(self.fd, RTC_IRQP_SET as _, hz as libc::c_ulong) };
        if rc == -1 {
            let err = Error::last_os_error();
            return Err(Error::new(
                err.kind(),
                format!("failed to program RTC frequency {hz} Hz: {err}"),
            ));
        }
        Ok(())
    }

    pub fn enable_interrupts(&self) -> io::Result<()> {
        let rc = unsafe { libc::ioctl(self.fd, RTC_PIE_ON as _, 0) };
        if rc == -1 {
            let err = Error::last_os_error();
            return Err(Error::new(
                err.kind(),
                format!("failed to enable RTC periodic interrupts: {err}"),
            ));
        }
        Ok(())
    }

    fn disable_interrupts(&self) {
        // Best effort on the way out; the descriptor is closing anyway.
        unsafe {
            libc::ioctl(self.fd, RTC_PIE_OFF as _, 0);
        }
    }

    /// Block until the next interrupt. One read returns one fixed-size
    /// record; the payload (interrupt count) is not interpreted here.
    pub fn read_interrupt(&self) -> io::Result<()> {
        let mut record: libc::c_ulong = 0;
        let n = unsafe {
            libc::read(
                self.fd,
                &mut record as *mut libc::c_ulong as *mut libc::c_void,
                std::mem::size_of::<libc::c_ulong>(),
            )
        };
        if n == -1 {
            let err = Error::last_os_error();
            return Err(Error::new(err.kind(), format!("RTC read failed: {err}")));
        }
        Ok(())
    }
}

impl Drop for RtcDevice {
    fn drop(&mut self) {
        self.disable_interrupts();
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Hardware-interrupt wakeup source: program the device, then one blocking
/// read per tick until abort or read failure.
pub struct RtcWakeup {
    device_path: String,
    period_millis: u64,
}

impl RtcWakeup {
    pub fn new(device_path: String, period_millis: u64) -> Self {
        Self {
            device_path,
            period_millis,
        }
    }

    pub fn drive<T: TickTarget>(&mut self, target: &mut T, ctrl: &RunControl) -> io::Result<()> {
        if self.period_millis == 0 {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                "hardware interrupt mode requires a non-zero period",
            ));
        }
        let quantized = quantize_period_ms(self.period_millis);
        let device = RtcDevice::open(&self.device_path)?;
        device.set_periodic_hz(RTC_BASE_HZ / quantized)?;
        device.enable_interrupts()?;

        while !ctrl.abort_requested() {
            // A read failure mid-run is handled like an abort request: the
            // error propagates, the loop exits and Drop releases the device.
            device.read_interrupt()?;
            target.tick();
            target.drain_inbound();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::SharedStats;
    use std::sync::mpsc;
    use std::time::Duration;

    struct CountingTarget {
        ticks: usize,
    }

    impl TickTarget for CountingTarget {
        fn tick(&mut self) {
            self.ticks += 1;
        }

        fn drain_inbound(&mut self) -> usize {
            0
        }

        fn wait_inbound(&mut self, _timeout: Duration) -> io::Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn period_quantizes_down_to_powers_of_two() {
        assert_eq!(quantize_period_ms(100), 64);
        assert_eq!(quantize_period_ms(64), 64);
        assert_eq!(quantize_period_ms(63), 32);
        assert_eq!(quantize_period_ms(16), 16);
        assert_eq!(quantize_period_ms(9), 8);
        assert_eq!(quantize_period_ms(3), 2);
        assert_eq!(quantize_period_ms(1), 1);
    }

    #[test]
    fn unopenable_device_is_a_startup_error() {
        assert!(RtcDevice::open("/definitely/not/an/rtc").is_err());
    }

    #[test]
    fn drive_with_unopenable_device_records_nothing() {
        let shared = SharedStats::new();
        let (_tx, rx) = mpsc::channel();
        let ctrl = RunControl::new(shared, rx);
        let mut target = CountingTarget { ticks: 0 };

        let result = RtcWakeup::new("/definitely/not/an/rtc".to_string(), 16)
            .drive(&mut target, &ctrl);
        assert!(result.is_err());
        assert_eq!(target.ticks, 0);
    }

    #[test]
    fn zero_period_is_rejected_up_front() {
        let shared = SharedStats::new();
        let (_tx, rx) = mpsc::channel();
        let ctrl = RunControl::new(shared, rx);
        let mut target = CountingTarget { ticks: 0 };

        let err = RtcWakeup::new("/dev/rtc".to_string(), 0)
            .drive(&mut target, &ctrl)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(target.ticks, 0);
    }
}
