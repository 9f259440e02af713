//! Hand landmarks and the feature vector derived from them.
//!
//! [`FeatureVector`] is the one representation shared by training and serving. Its length is
//! fixed in the type, and the only way to build one from detector output is
//! [`FeatureVector::from_landmarks`], which enforces the landmark count and coordinate order.

use std::fmt;

use itertools::zip_eq;

use crate::error::ExtractError;

/// Number of landmarks estimated for one hand.
pub const NUM_LANDMARKS: usize = 21;

/// Number of coordinates stored per landmark (X, Y, Z).
pub const COORDS_PER_LANDMARK: usize = 3;

/// Length of a [`FeatureVector`].
pub const FEATURE_LEN: usize = NUM_LANDMARKS * COORDS_PER_LANDMARK;

type Position = [f32; 3];

/// A set of landmark positions.
#[derive(Clone, PartialEq)]
pub struct Landmarks {
    positions: Box<[Position]>,
}

impl Landmarks {
    /// Creates a new [`Landmarks`] collection containing `len` preallocated landmarks.
    ///
    /// All landmarks will start with all coordinates at `0.0`.
    pub fn new(len: usize) -> Self {
        Self {
            positions: vec![[0.0, 0.0, 0.0]; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Landmark> + '_ {
        self.positions.iter().map(|&pos| Landmark::new(pos))
    }

    pub fn get(&self, index: usize) -> Landmark {
        Landmark::new(self.positions[index])
    }

    pub fn set(&mut self, index: usize, landmark: Landmark) {
        self.positions[index] = landmark.pos;
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [Position] {
        &mut self.positions
    }

    pub fn map_positions(&mut self, mut f: impl FnMut(Position) -> Position) {
        for pos in self.positions_mut() {
            *pos = f(*pos);
        }
    }
}

impl FromIterator<Position> for Landmarks {
    fn from_iter<T: IntoIterator<Item = Position>>(iter: T) -> Self {
        Self {
            positions: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for Landmarks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.positions.iter()).finish()
    }
}

/// A landmark in 3D space.
#[derive(Debug, PartialEq, PartialOrd, Clone, Copy)]
pub struct Landmark {
    pos: [f32; 3],
}

impl Landmark {
    pub fn new(position: [f32; 3]) -> Self {
        Self { pos: position }
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.pos
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.pos[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.pos[1]
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.pos[2]
    }
}

/// The flattened landmark coordinates of one hand: `x0, y0, z0, x1, y1, z1, …, z20`.
#[derive(Clone, PartialEq)]
pub struct FeatureVector([f32; FEATURE_LEN]);

impl FeatureVector {
    /// Flattens a detected hand into a feature vector.
    ///
    /// Fails if `landmarks` does not contain exactly [`NUM_LANDMARKS`] points, or if any
    /// coordinate is NaN or infinite.
    pub fn from_landmarks(landmarks: &Landmarks) -> Result<Self, ExtractError> {
        if landmarks.len() != NUM_LANDMARKS {
            return Err(ExtractError::LandmarkCount {
                expected: NUM_LANDMARKS,
                found: landmarks.len(),
            });
        }

        let mut values = [0.0; FEATURE_LEN];
        for (out, pos) in zip_eq(
            values.chunks_exact_mut(COORDS_PER_LANDMARK),
            landmarks.positions(),
        ) {
            out.copy_from_slice(pos);
        }
        Self::from_array(values)
    }

    /// Creates a feature vector from already flattened values.
    pub fn from_array(values: [f32; FEATURE_LEN]) -> Result<Self, ExtractError> {
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(ExtractError::NonFinite { index });
        }
        Ok(Self(values))
    }

    /// Creates a feature vector from a slice, which must have exactly [`FEATURE_LEN`] elements.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        let values: [f32; FEATURE_LEN] = values.try_into().ok()?;
        Self::from_array(values).ok()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Returns the coordinates of landmark `index`.
    pub fn landmark(&self, index: usize) -> Landmark {
        let start = index * COORDS_PER_LANDMARK;
        Landmark::new([self.0[start], self.0[start + 1], self.0[start + 2]])
    }
}

impl fmt::Debug for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FeatureVector").field(&&self.0[..]).finish()
    }
}
