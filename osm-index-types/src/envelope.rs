use geo::Rect;
use serde::{Deserialize, Serialize};

/// A 2D axis-aligned bounding box.
///
/// The x axis is longitude and the y axis is latitude. Bounds are inclusive, so
/// two envelopes that only share an edge still intersect.
///
/// An envelope built with [`Envelope::empty`] has inverted infinite bounds. It
/// intersects nothing, and extending it by any envelope yields exactly that
/// envelope, which makes it the neutral element for [`Envelope::extend`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Minimum x (longitude) coordinate
    pub min_x: f64,
    /// Minimum y (latitude) coordinate
    pub min_y: f64,
    /// Maximum x (longitude) coordinate
    pub max_x: f64,
    /// Maximum y (latitude) coordinate
    pub max_y: f64,
}

impl Envelope {
    /// Create a new envelope from minimum and maximum coordinates.
    ///
    /// # Arguments
    ///
    /// * `min_x` - Minimum longitude/x coordinate
    /// * `min_y` - Minimum latitude/y coordinate
    /// * `max_x` - Maximum longitude/x coordinate
    /// * `max_y` - Maximum latitude/y coordinate
    ///
    /// # Examples
    ///
    /// ```
    /// use osm_index_types::Envelope;
    ///
    /// let envelope = Envelope::new(-74.0, 40.7, -73.9, 40.8);
    /// assert!((envelope.width() - 0.1).abs() < 1e-9);
    /// ```
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// The empty envelope: contains nothing, intersects nothing.
    pub const fn empty() -> Self {
        Self {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    /// Degenerate envelope covering a single point.
    pub fn from_point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    /// Create an envelope from a `geo::Rect`.
    pub fn from_rect(rect: Rect) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// Convert into a `geo::Rect`. Returns `None` for the empty envelope.
    pub fn to_rect(&self) -> Option<Rect> {
        if self.is_empty() {
            return None;
        }
        Some(Rect::new(
            geo::coord! { x: self.min_x, y: self.min_y },
            geo::coord! { x: self.max_x, y: self.max_y },
        ))
    }

    /// Whether the bounds are inverted on either axis.
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Whether all four bounds are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// `(max_x - min_x) * (max_y - min_y)`, or zero for the empty envelope.
    pub fn area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.width() * self.height()
    }

    /// Half perimeter: `(max_x - min_x) + (max_y - min_y)`, or zero when empty.
    pub fn margin(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.width() + self.height()
    }

    /// Check if this envelope intersects with another.
    pub fn intersects(&self, other: &Envelope) -> bool {
        !(self.max_x < other.min_x
            || self.min_x > other.max_x
            || self.max_y < other.min_y
            || self.min_y > other.max_y)
    }

    /// Check if `other` lies entirely within this envelope.
    pub fn contains(&self, other: &Envelope) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && other.max_x <= self.max_x
            && other.max_y <= self.max_y
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Grow this envelope in place so that it also covers `other`.
    pub fn extend(&mut self, other: &Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// The smallest envelope covering both inputs.
    pub fn union(&self, other: &Envelope) -> Envelope {
        let mut merged = *self;
        merged.extend(other);
        merged
    }

    /// Area of the union of `a` and `b`.
    pub fn combined_area(a: &Envelope, b: &Envelope) -> f64 {
        a.union(b).area()
    }

    /// Area of the overlap of `a` and `b`; disjoint envelopes give zero.
    pub fn intersection_area(a: &Envelope, b: &Envelope) -> f64 {
        let min_x = a.min_x.max(b.min_x);
        let min_y = a.min_y.max(b.min_y);
        let max_x = a.max_x.min(b.max_x);
        let max_y = a.max_y.min(b.max_y);

        (max_x - min_x).max(0.0) * (max_y - min_y).max(0.0)
    }

    /// Area increase needed for this envelope to also cover `other`.
    pub fn enlargement(&self, other: &Envelope) -> f64 {
        Self::combined_area(self, other) - self.area()
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Rect> for Envelope {
    fn from(rect: Rect) -> Self {
        Self::from_rect(rect)
    }
}
