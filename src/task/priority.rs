/// Scheduling priority of a task.
///
/// A task with a higher priority is preferred over a task with a lower one,
/// but the guarantee is approximate: because the ready queues are distributed
/// across workers, one worker may process a `Low` task while another worker
/// still has `Critical` work queued. Local selection and steal policies merely
/// prefer higher bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
}

impl Priority {
    /// Number of priority bands. Each worker multiplexes one queue per band.
    pub(crate) const COUNT: usize = 4;

    /// The queue band this priority maps to. Band 0 is scanned first.
    pub(crate) fn band(self) -> usize {
        self as usize
    }

    pub(crate) fn from_band(band: u8) -> Priority {
        match band {
            0 => Priority::Critical,
            1 => Priority::High,
            2 => Priority::Normal,
            3 => Priority::Low,
            _ => unreachable!("invalid priority band: {}", band),
        }
    }
}

/// Where a task is allowed to run.
///
/// `Worker(k)` pins the task to worker slot `k`; only that worker will ever
/// execute its body. Slot 0 is the thread that called [`start`], so
/// `Worker(0)` pins work to the main thread while it sits in [`enter`].
/// Typical use is code tied to thread-bound state such as a GPU context.
///
/// [`start`]: crate::start
/// [`enter`]: crate::enter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Affinity {
    #[default]
    Any,
    Worker(u16),
}

/// Wire encoding of "any worker".
pub(crate) const AFFINITY_ANY: u16 = 0xffff;

impl Affinity {
    pub(crate) fn to_raw(self) -> u16 {
        match self {
            Affinity::Any => AFFINITY_ANY,
            Affinity::Worker(k) => {
                debug_assert_ne!(k, AFFINITY_ANY, "worker index {:#x} is reserved", AFFINITY_ANY);
                k
            }
        }
    }

    pub(crate) fn from_raw(raw: u16) -> Affinity {
        if raw == AFFINITY_ANY {
            Affinity::Any
        } else {
            Affinity::Worker(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_encoding_is_fixed() {
        assert_eq!(Priority::Critical.band(), 0);
        assert_eq!(Priority::High.band(), 1);
        assert_eq!(Priority::Normal.band(), 2);
        assert_eq!(Priority::Low.band(), 3);

        for band in 0..Priority::COUNT as u8 {
            assert_eq!(Priority::from_band(band).band(), band as usize);
        }
    }

    #[test]
    fn affinity_round_trips() {
        assert_eq!(Affinity::from_raw(Affinity::Any.to_raw()), Affinity::Any);
        assert_eq!(
            Affinity::from_raw(Affinity::Worker(3).to_raw()),
            Affinity::Worker(3)
        );
        assert_eq!(Affinity::from_raw(AFFINITY_ANY), Affinity::Any);
    }

    #[test]
    fn defaults() {
        assert_eq!(Priority::default(), Priority::Normal);
        assert_eq!(Affinity::default(), Affinity::Any);
    }
}
