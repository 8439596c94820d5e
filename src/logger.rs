//! `log` output over RTT

#[cfg(feature = "rtt")]
pub use self::rtt::{init_rtt_logger, RttLogger};

#[cfg(feature = "rtt")]
mod rtt {
    use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
    use rtt_target::{rprintln, rtt_init_print};

    pub struct RttLogger {
        level: LevelFilter,
    }

    impl Log for RttLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                rprintln!("[{}] {}", record.level(), record.args());
            }
        }

        fn flush(&self) {}
    }

    static mut LOGGER: RttLogger = RttLogger {
        level: LevelFilter::Off,
    };

    /// Set up the RTT up channel and route `log` records of `level` and above to it.
    ///
    /// # Safety
    ///
    /// Must be called once, before interrupts that may log are enabled.
    pub unsafe fn init_rtt_logger(level: LevelFilter) -> Result<(), SetLoggerError> {
        rtt_init_print!(NoBlockSkip);

        LOGGER.level = level;
        log::set_logger_racy(&*core::ptr::addr_of!(LOGGER))?;
        log::set_max_level_racy(level);
        Ok(())
    }
}
