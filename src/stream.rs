//! Lazy record streams with scoped-resource cleanup.
//!
//! Every scan strategy returns a `RecordStream`: a boxed iterator of
//! `Result<Record>` plus a list of close finalizers. Finalizers run exactly
//! once, either through an explicit `close()` or when the stream is
//! dropped, regardless of whether iteration completed. Side effects such as
//! "delete the temporary dataset backing this stream" are attached here.

use crate::error::Result;
use crate::types::Record;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type RecordIter = Box<dyn Iterator<Item = Result<Record>> + Send>;
type Finalizer = Box<dyn FnOnce() + Send>;

pub struct RecordStream {
    iter: Option<RecordIter>,
    finalizers: Vec<Finalizer>,
}

impl RecordStream {
    /// Stream over an already-materialized batch.
    pub fn from_records(records: Vec<Record>) -> Self {
        Self::from_iter(Box::new(records.into_iter().map(Ok)))
    }

    /// Stream over an arbitrary lazy iterator.
    pub fn from_iter(iter: RecordIter) -> Self {
        Self {
            iter: Some(iter),
            finalizers: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::from_records(Vec::new())
    }

    /// Register a finalizer to run when the stream closes. Finalizers run
    /// in registration order.
    pub fn on_close(mut self, finalizer: impl FnOnce() + Send + 'static) -> Self {
        self.finalizers.push(Box::new(finalizer));
        self
    }

    /// Release all underlying resources. The iterator is dropped before
    /// any finalizer runs, so cleanup never races open cursors. Idempotent.
    pub fn close(&mut self) {
        self.iter = None;
        for finalizer in self.finalizers.drain(..) {
            finalizer();
        }
    }

    /// Keep each record independently with probability `ratio`.
    ///
    /// Sampling is probabilistic; pair with `take_records` when a hard
    /// upper bound is required. A ratio of 1 or more keeps everything.
    pub fn sample(mut self, ratio: f64) -> Self {
        if ratio >= 1.0 {
            return self;
        }
        let iter = self.take_iter();
        let mut rng = StdRng::from_entropy();
        let sampled = iter.filter(move |item| item.is_err() || rng.gen_bool(ratio.max(0.0)));
        Self {
            iter: Some(Box::new(sampled)),
            finalizers: std::mem::take(&mut self.finalizers),
        }
    }

    /// Hard cap on the number of records yielded.
    pub fn take_records(mut self, n: usize) -> Self {
        let iter = self.take_iter();
        Self {
            iter: Some(Box::new(iter.take(n))),
            finalizers: std::mem::take(&mut self.finalizers),
        }
    }

    /// Keep only records passing `predicate`. Errors pass through.
    pub fn filter_records(mut self, predicate: impl Fn(&Record) -> bool + Send + 'static) -> Self {
        let iter = self.take_iter();
        let filtered = iter.filter(move |item| match item {
            Ok(record) => predicate(record),
            Err(_) => true,
        });
        Self {
            iter: Some(Box::new(filtered)),
            finalizers: std::mem::take(&mut self.finalizers),
        }
    }

    /// Concatenate another stream after this one. Finalizers of both
    /// streams are carried over.
    pub fn chain(mut self, mut other: RecordStream) -> Self {
        let iter = self.take_iter().chain(other.take_iter());
        let mut finalizers = std::mem::take(&mut self.finalizers);
        finalizers.append(&mut other.finalizers);
        Self {
            iter: Some(Box::new(iter)),
            finalizers,
        }
    }

    /// Drain the stream into a vector, then close it.
    pub fn collect_records(mut self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for item in self.by_ref() {
            records.push(item?);
        }
        self.close();
        Ok(records)
    }

    fn take_iter(&mut self) -> RecordIter {
        self.iter
            .take()
            .unwrap_or_else(|| Box::new(std::iter::empty()))
    }
}

impl Iterator for RecordStream {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.as_mut()?.next()
    }
}

impl Drop for RecordStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("open", &self.iter.is_some())
            .field("finalizers", &self.finalizers.len())
            .finish()
    }
}
