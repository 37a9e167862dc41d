use crate::{Error, ErrorExt};
use bitflags::bitflags;
use cap_std::time::{Duration, Instant, SystemClock};
use cap_std::{AmbientAuthority, ambient_authority};
use cap_time_ext::{MonotonicClockExt, SystemClockExt};
use std::time::UNIX_EPOCH;

/// A preview1 clock id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockId {
    Realtime,
    Monotonic,
    ProcessCputime,
    ThreadCputime,
}

impl TryFrom<u32> for ClockId {
    type Error = Error;
    fn try_from(id: u32) -> Result<ClockId, Error> {
        match id {
            0 => Ok(ClockId::Realtime),
            1 => Ok(ClockId::Monotonic),
            2 => Ok(ClockId::ProcessCputime),
            3 => Ok(ClockId::ThreadCputime),
            _ => Err(Error::invalid_argument().context(format!("unknown clock id {id}"))),
        }
    }
}

/// A single clock sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockReading {
    pub clock_id: ClockId,
    pub seconds: i64,
    pub nanoseconds: u32,
}

impl ClockReading {
    fn from_duration(clock_id: ClockId, d: Duration) -> Result<Self, Error> {
        Ok(ClockReading {
            clock_id,
            seconds: i64::try_from(d.as_secs())?,
            nanoseconds: d.subsec_nanos(),
        })
    }

    /// The reading as a preview1 timestamp.
    pub fn as_nanos(&self) -> Result<u64, Error> {
        let seconds = u64::try_from(self.seconds)?;
        seconds
            .checked_mul(1_000_000_000)
            .and_then(|ns| ns.checked_add(u64::from(self.nanoseconds)))
            .ok_or_else(Error::overflow)
    }
}

pub struct WasiClocks {
    system: SystemClock,
    monotonic: cap_std::time::MonotonicClock,
    creation_time: Instant,
}

impl WasiClocks {
    pub fn new(ambient_authority: AmbientAuthority) -> Self {
        let monotonic = cap_std::time::MonotonicClock::new(ambient_authority);
        let creation_time = monotonic.now();
        WasiClocks {
            system: SystemClock::new(ambient_authority),
            monotonic,
            creation_time,
        }
    }

    pub fn get_clock(&self, id: ClockId) -> Result<ClockReading, Error> {
        self.now_with(id, Duration::ZERO)
    }

    /// Sample a clock. `precision` is a hint for the maximum lag the caller
    /// tolerates.
    pub fn now_with(&self, id: ClockId, precision: Duration) -> Result<ClockReading, Error> {
        let elapsed = match id {
            ClockId::Realtime => self
                .system
                .now_with(precision)
                .into_std()
                .duration_since(UNIX_EPOCH)
                .map_err(|_| Error::trap(anyhow::Error::msg("current time before unix epoch")))?,
            ClockId::Monotonic => self
                .monotonic
                .now_with(precision)
                .duration_since(self.creation_time),
            ClockId::ProcessCputime | ClockId::ThreadCputime => cputime::now(id)?,
        };
        ClockReading::from_duration(id, elapsed)
    }

    pub fn resolution(&self, id: ClockId) -> Result<Duration, Error> {
        match id {
            ClockId::Realtime => Ok(self.system.resolution()),
            ClockId::Monotonic => Ok(self.monotonic.resolution()),
            ClockId::ProcessCputime | ClockId::ThreadCputime => cputime::resolution(id),
        }
    }
}

impl Default for WasiClocks {
    fn default() -> Self {
        WasiClocks::new(ambient_authority())
    }
}

#[cfg(unix)]
mod cputime {
    use super::ClockId;
    use crate::Error;
    use cap_std::time::Duration;
    use rustix::time::{ClockId as HostClock, Timespec};

    fn host_clock(id: ClockId) -> HostClock {
        match id {
            ClockId::ThreadCputime => HostClock::ThreadCPUTime,
            _ => HostClock::ProcessCPUTime,
        }
    }

    fn to_duration(ts: Timespec) -> Result<Duration, Error> {
        Ok(Duration::new(
            u64::try_from(ts.tv_sec)?,
            u32::try_from(ts.tv_nsec)?,
        ))
    }

    pub fn now(id: ClockId) -> Result<Duration, Error> {
        to_duration(rustix::time::clock_gettime(host_clock(id)))
    }

    pub fn resolution(id: ClockId) -> Result<Duration, Error> {
        to_duration(rustix::time::clock_getres(host_clock(id)))
    }
}

#[cfg(not(unix))]
mod cputime {
    use super::ClockId;
    use crate::{Error, ErrorExt};
    use cap_std::time::Duration;

    pub fn now(_id: ClockId) -> Result<Duration, Error> {
        Err(Error::not_supported().context("cpu-time clocks are not supported on this host"))
    }

    pub fn resolution(_id: ClockId) -> Result<Duration, Error> {
        Err(Error::not_supported().context("cpu-time clocks are not supported on this host"))
    }
}

bitflags! {
    /// Which timestamps a `*_set_times` call updates.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Fstflags: u16 {
        const ATIM     = 0b0001;
        const ATIM_NOW = 0b0010;
        const MTIM     = 0b0100;
        const MTIM_NOW = 0b1000;
    }
}

/// A requested timestamp: an absolute time, or whatever the host clock reads
/// when the update is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemTimeSpec {
    SymbolicNow,
    Absolute(std::time::SystemTime),
}

impl SystemTimeSpec {
    pub(crate) fn into_fd_spec(self) -> fs_set_times::SystemTimeSpec {
        match self {
            SystemTimeSpec::SymbolicNow => fs_set_times::SystemTimeSpec::SymbolicNow,
            SystemTimeSpec::Absolute(t) => fs_set_times::SystemTimeSpec::Absolute(t),
        }
    }

    pub(crate) fn into_path_spec(self) -> cap_fs_ext::SystemTimeSpec {
        match self {
            SystemTimeSpec::SymbolicNow => cap_fs_ext::SystemTimeSpec::SymbolicNow,
            SystemTimeSpec::Absolute(t) => {
                cap_fs_ext::SystemTimeSpec::Absolute(cap_std::time::SystemTime::from_std(t))
            }
        }
    }
}

/// The `{atim, mtim, fst_flags}` triple a guest passes to the set-times calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampSpec {
    pub atim: u64,
    pub mtim: u64,
    pub fst_flags: Fstflags,
}

impl TimestampSpec {
    /// Split into the access and modification updates. `None` leaves that
    /// timestamp untouched.
    pub fn resolve(&self) -> Result<(Option<SystemTimeSpec>, Option<SystemTimeSpec>), Error> {
        let atim = systimespec(
            self.fst_flags.contains(Fstflags::ATIM),
            self.atim,
            self.fst_flags.contains(Fstflags::ATIM_NOW),
        )?;
        let mtim = systimespec(
            self.fst_flags.contains(Fstflags::MTIM),
            self.mtim,
            self.fst_flags.contains(Fstflags::MTIM_NOW),
        )?;
        Ok((atim, mtim))
    }
}

fn systimespec(set: bool, ts: u64, now: bool) -> Result<Option<SystemTimeSpec>, Error> {
    if set && now {
        Err(Error::invalid_argument().context("timestamp is both absolute and now"))
    } else if set {
        Ok(Some(SystemTimeSpec::Absolute(
            UNIX_EPOCH + std::time::Duration::from_nanos(ts),
        )))
    } else if now {
        Ok(Some(SystemTimeSpec::SymbolicNow))
    } else {
        Ok(None)
    }
}
