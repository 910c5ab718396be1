// Copyright 2024 Google LLC
// SPDX-License-Identifier: MIT

use log::{LevelFilter, Log, Metadata, Record};
use std::sync::{Mutex, Once, PoisonError};

pub type Callback = Box<dyn Fn(&Record) + Send>;

struct Logger {
    callback: Mutex<Option<Callback>>,
}

impl Logger {
    fn update(&self, callback: Callback) {
        let mut cur = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        *cur = Some(callback);
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, rec: &Record) {
        if !self.enabled(rec.metadata()) {
            return;
        }

        let callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback(rec);
        }
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger {
    callback: Mutex::new(None),
};

/// Forwards log records up to `filter` to `callback`.
///
/// It can be called repeatedly to replace the callback.  It does nothing when another logger
/// has been installed.
pub fn init(filter: LevelFilter, callback: Callback) {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        if log::set_logger(&LOGGER).is_err() {
            eprintln!("dralloc: a logger is already installed");
        }
    });

    LOGGER.update(callback);
    log::set_max_level(filter);
}
