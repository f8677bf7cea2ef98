//! Height of a distant object from a baseline distance and two sighting angles.

use std::fmt;

/// Which of the three sighting fields a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightingField {
    Distance,
    AngleToTop,
    AngleToBottom,
}

impl fmt::Display for SightingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SightingField::Distance => "distance",
            SightingField::AngleToTop => "angle to top",
            SightingField::AngleToBottom => "angle to bottom",
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HeightError {
    #[error("invalid {field}: {value:?} is not a finite number")]
    InvalidInput { field: SightingField, value: String },
}

/// Raw text of the sighting form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SightingInput {
    pub distance: String,
    pub angle_to_top: String,
    pub angle_to_bottom: String,
}

impl SightingInput {
    pub fn calculate(&self) -> Result<HeightResult, HeightError> {
        let sighting = Sighting::parse(&self.distance, &self.angle_to_top, &self.angle_to_bottom)?;
        Ok(HeightResult {
            height_units: sighting.height(),
            sighting,
        })
    }

    pub fn clear(&mut self) {
        self.distance.clear();
        self.angle_to_top.clear();
        self.angle_to_bottom.clear();
    }
}

/// A validated sighting. Angles are in degrees, positive upwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sighting {
    pub distance: f64,
    pub angle_top_deg: f64,
    pub angle_bottom_deg: f64,
}

impl Sighting {
    pub fn parse(distance: &str, angle_top: &str, angle_bottom: &str) -> Result<Self, HeightError> {
        Ok(Self {
            distance: parse_finite(SightingField::Distance, distance)?,
            angle_top_deg: parse_finite(SightingField::AngleToTop, angle_top)?,
            angle_bottom_deg: parse_finite(SightingField::AngleToBottom, angle_bottom)?,
        })
    }

    pub fn rise_to_top(&self) -> f64 {
        self.distance * (self.angle_top_deg * (std::f64::consts::PI / 180.0)).tan()
    }

    pub fn rise_to_bottom(&self) -> f64 {
        self.distance * (self.angle_bottom_deg * (std::f64::consts::PI / 180.0)).tan()
    }

    /// Sum of both rises. The bottom term is added, so a base below eye level
    /// has to be entered as a positive depression angle.
    pub fn height(&self) -> f64 {
        self.rise_to_top() + self.rise_to_bottom()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightResult {
    pub height_units: f64,
    pub sighting: Sighting,
}

/// Height line of the main view. Shows a dash until a sighting succeeds.
pub fn height_readout(result: Option<&HeightResult>) -> String {
    match result {
        Some(r) => format!("Calculated Height: {:.2} units", r.height_units),
        None => "Calculated Height: —".to_owned(),
    }
}

/// Computes the object height from the raw form strings.
///
/// Fails with [`HeightError::InvalidInput`] before any arithmetic if a field
/// is empty, non-numeric or not finite. Angles near ±90° are not rejected and
/// yield very large (possibly infinite) heights.
pub fn calculate(distance: &str, angle_top: &str, angle_bottom: &str) -> Result<f64, HeightError> {
    Sighting::parse(distance, angle_top, angle_bottom).map(|s| s.height())
}

fn parse_finite(field: SightingField, value: &str) -> Result<f64, HeightError> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(HeightError::InvalidInput {
            field,
            value: value.to_owned(),
        }),
    }
}
