use std::thread;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, Offset, Timelike, Utc, Weekday};
use rand::Rng;

use crate::config::{BatchSizes, DelayRange, DelayRanges, HarvestConfig, LoadWindow};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Blocks between remote requests.
pub trait Pacer {
    fn pause(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBand {
    Normal,
    ReducedLoad,
}

/// Batch size and politeness delay as a function of wall-clock time.
#[derive(Debug, Clone)]
pub struct RateSchedule {
    sizes: BatchSizes,
    delays: DelayRanges,
    window: LoadWindow,
    offset: FixedOffset,
}

impl RateSchedule {
    pub fn new(config: &HarvestConfig) -> Self {
        let offset = FixedOffset::east_opt(config.window.utc_offset_hours * 3600)
            .unwrap_or(Utc.fix());
        Self {
            sizes: config.batch,
            delays: config.delay,
            window: config.window,
            offset,
        }
    }

    pub fn band(&self, now: DateTime<Utc>) -> LoadBand {
        let local = now.with_timezone(&self.offset);
        let weekend = matches!(local.weekday(), Weekday::Sat | Weekday::Sun);
        let hour = local.hour();
        let business =
            hour >= self.window.business_start_hour && hour < self.window.business_end_hour;
        if (self.window.weekends_reduced && weekend) || !business {
            LoadBand::ReducedLoad
        } else {
            LoadBand::Normal
        }
    }

    pub fn is_reduced_load(&self, now: DateTime<Utc>) -> bool {
        self.band(now) == LoadBand::ReducedLoad
    }

    pub fn batch_size(&self, now: DateTime<Utc>) -> usize {
        match self.band(now) {
            LoadBand::Normal => self.sizes.normal,
            LoadBand::ReducedLoad => self.sizes.reduced_load,
        }
    }

    pub fn delay_range(&self, now: DateTime<Utc>) -> DelayRange {
        match self.band(now) {
            LoadBand::Normal => self.delays.normal,
            LoadBand::ReducedLoad => self.delays.reduced_load,
        }
    }

    /// Samples uniformly from the active band's range.
    pub fn delay<R: Rng + ?Sized>(&self, now: DateTime<Utc>, rng: &mut R) -> Duration {
        let range = self.delay_range(now);
        let secs = if range.max_secs > range.min_secs {
            rng.gen_range(range.min_secs..=range.max_secs)
        } else {
            range.min_secs
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}
