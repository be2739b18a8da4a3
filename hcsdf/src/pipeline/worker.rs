use std::any::Any;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::warn;
use rayon::prelude::*;

use crate::error::{EngineError, Result};

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

fn attempt<K, R, F>(unit: &K, work: &F) -> std::result::Result<R, String>
where
    F: Fn(&K) -> Result<R>,
{
    match catch_unwind(AssertUnwindSafe(|| work(unit))) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload)),
    }
}

/// Run one unit, retrying it once on the same thread if it errors or panics.
pub fn run_unit<K, R, F>(unit: &K, work: &F) -> Result<R>
where
    K: Display,
    F: Fn(&K) -> Result<R>,
{
    match attempt(unit, work) {
        Ok(result) => Ok(result),
        Err(first) => {
            warn!("unit {} failed ({}), retrying", unit, first);
            attempt(unit, work).map_err(|message| EngineError::WorkerFailure { key: unit.to_string(), message })
        }
    }
}

/// Fan `units` out over the current rayon pool and collect the results in
/// unit order. Any unit failing twice fails the whole call.
pub fn fan_out<K, R, F>(units: &[K], work: F) -> Result<Vec<R>>
where
    K: Display + Sync,
    R: Send,
    F: Fn(&K) -> Result<R> + Sync,
{
    units.par_iter().map(|unit| run_unit(unit, &work)).collect()
}
