use serde::{Deserialize, Serialize};

/// A resource requirement expressed either as an exact value or as a range.
///
/// While both bounds are unset the value is exact. Setting either bound turns
/// it into a range and clears the exact value, so a `RangeValue` never carries
/// both representations at once.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeValue {
    exact: Option<f64>,
    epsilon: f64,
    lower: Option<f64>,
    upper: Option<f64>,
    include_lower: bool,
    include_upper: bool,
}

impl RangeValue {
    /// An exact value with no tolerance
    pub fn exact(value: f64) -> Self {
        Self {
            exact: Some(value),
            include_lower: true,
            include_upper: true,
            ..Default::default()
        }
    }

    /// An exact value accepted within `epsilon`
    pub fn exact_with_epsilon(value: f64, epsilon: f64) -> Self {
        Self {
            epsilon,
            ..Self::exact(value)
        }
    }

    /// A range bounded below
    pub fn at_least(lower: f64, inclusive: bool) -> Self {
        Self::default().with_lower_bound(lower, inclusive)
    }

    /// A range bounded above
    pub fn at_most(upper: f64, inclusive: bool) -> Self {
        Self::default().with_upper_bound(upper, inclusive)
    }

    /// Set the lower bound, switching to the ranged representation
    pub fn with_lower_bound(mut self, lower: f64, inclusive: bool) -> Self {
        self.exact = None;
        self.epsilon = 0.0;
        self.lower = Some(lower);
        self.include_lower = inclusive;
        self
    }

    /// Set the upper bound, switching to the ranged representation
    pub fn with_upper_bound(mut self, upper: f64, inclusive: bool) -> Self {
        self.exact = None;
        self.epsilon = 0.0;
        self.upper = Some(upper);
        self.include_upper = inclusive;
        self
    }

    pub fn exact_value(&self) -> Option<f64> {
        self.exact
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn lower_bound(&self) -> Option<f64> {
        self.lower
    }

    pub fn upper_bound(&self) -> Option<f64> {
        self.upper
    }

    pub fn includes_lower_bound(&self) -> bool {
        self.include_lower
    }

    pub fn includes_upper_bound(&self) -> bool {
        self.include_upper
    }

    /// True when neither bound is set
    pub fn is_exact(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// True when the value carries nothing usable (no exact value, no bounds)
    pub fn is_unpopulated(&self) -> bool {
        self.is_exact() && self.exact.is_none()
    }
}
