//! A fixed-size pool of hand detectors with exclusive checkout.
//!
//! Landmark models keep per-call scratch state and are driven through `&mut self`, so concurrent
//! requests cannot share one instance. A [`DetectorPool`] owns a fixed number of instances and
//! hands each one to at most one caller at a time. Callers block while all instances are in use.

use std::ops::{Deref, DerefMut};

use crossbeam::channel::{self, Receiver, Sender};

/// A pool of `D`s handed out with [`DetectorPool::checkout`].
pub struct DetectorPool<D> {
    sender: Sender<D>,
    recv: Receiver<D>,
    size: usize,
}

impl<D> DetectorPool<D> {
    /// Creates a pool containing `detectors`.
    ///
    /// # Panics
    ///
    /// Panics if `detectors` is empty, since checking out of an empty pool would block forever.
    pub fn new<I: IntoIterator<Item = D>>(detectors: I) -> Self {
        let detectors = detectors.into_iter().collect::<Vec<_>>();
        assert!(!detectors.is_empty(), "detector pool must not be empty");

        let size = detectors.len();
        let (sender, recv) = channel::bounded(size);
        for detector in detectors {
            // Capacity is `size`, so this never blocks or fails.
            sender.send(detector).ok();
        }
        Self { sender, recv, size }
    }

    /// Creates a pool of `size` detectors (at least 1) by calling `create` repeatedly.
    pub fn from_fn<F, E>(size: usize, mut create: F) -> Result<Self, E>
    where
        F: FnMut() -> Result<D, E>,
    {
        let detectors = (0..size.max(1))
            .map(|_| create())
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Self::new(detectors))
    }

    /// Returns the number of detectors owned by the pool.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of detectors that are currently not checked out.
    pub fn available(&self) -> usize {
        self.recv.len()
    }

    /// Takes a detector out of the pool, blocking until one is available.
    ///
    /// The detector is returned to the pool when the [`Checkout`] is dropped.
    pub fn checkout(&self) -> Checkout<'_, D> {
        let detector = self
            .recv
            .recv()
            .expect("the pool holds a sender, so its channel is never disconnected");
        Checkout {
            detector: Some(detector),
            pool: self,
        }
    }

    /// Takes a detector out of the pool if one is available right now.
    pub fn try_checkout(&self) -> Option<Checkout<'_, D>> {
        let detector = self.recv.try_recv().ok()?;
        Some(Checkout {
            detector: Some(detector),
            pool: self,
        })
    }
}

/// Exclusive access to a pooled detector. Returns the detector to its pool on drop.
pub struct Checkout<'a, D> {
    detector: Option<D>,
    pool: &'a DetectorPool<D>,
}

impl<D> Deref for Checkout<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        // Only `None` during `drop`.
        self.detector.as_ref().unwrap()
    }
}

impl<D> DerefMut for Checkout<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.detector.as_mut().unwrap()
    }
}

impl<D> Drop for Checkout<'_, D> {
    fn drop(&mut self) {
        if let Some(detector) = self.detector.take() {
            self.pool.sender.send(detector).ok();
        }
    }
}
