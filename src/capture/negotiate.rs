//! # Device Parameter Negotiation
//!
//! Pure functions that turn what the hardware offers into what we ask for:
//! preview/picture size, preview FPS, preview rotation, focus areas and the
//! texture transform for the frame source.
//!
//! ## Plain English
//!
//! The camera says "I can do 640x480, 1280x720, 1920x1080, 4032x3024".
//! We say "I'd like about 1920x1080". This module picks one, the same way
//! every time for the same inputs.

use serde::{Deserialize, Serialize};

use super::{Facing, Size};
use crate::error::{DeviceError, DeviceResult};

/// Focus/metering coordinate space used by camera drivers.
pub const DRIVER_COORDINATE_MAX: i32 = 1000;

// ============================================
// ASPECT RATIO
// ============================================

/// Preview aspect ratio.
///
/// Ratios are height/width in sensor order (sensors are landscape).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    Ratio4x3,
    Ratio1x1,
    Ratio16x9,
}

impl AspectRatio {
    /// Height divided by width.
    pub fn ratio(self) -> f32 {
        match self {
            Self::Ratio4x3 => 0.75,
            Self::Ratio1x1 => 1.0,
            Self::Ratio16x9 => 0.5625,
        }
    }

    /// Default expected size for this ratio.
    pub fn default_size(self) -> Size {
        match self {
            Self::Ratio4x3 => Size::new(1024, 768),
            Self::Ratio1x1 => Size::new(1080, 1080),
            Self::Ratio16x9 => Size::new(1280, 720),
        }
    }
}

// ============================================
// SIZE SELECTION
// ============================================

/// How to choose among sizes with the expected aspect ratio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizePolicy {
    /// Smallest size not exceeding the expected one
    Min,
    /// Largest size exceeding the expected one
    Max,
    /// Nearest without exceeding, else nearest above (within 80%)
    Lower,
    /// Nearest at or above, else nearest below (within 80%)
    Larger,
}

/// Policy used for preview sizes.
pub const PREVIEW_POLICY: SizePolicy = SizePolicy::Lower;

/// Policy used for still picture sizes.
pub const PICTURE_POLICY: SizePolicy = SizePolicy::Larger;

/// Minimum fraction of the expected size a candidate must reach.
const ACCEPT_RATIO: f32 = 0.8;

/// Picks a size from `sizes` for the expected dimensions.
///
/// Same-ratio candidates are tried first according to `policy`. If none is
/// acceptable the closest size wins: exact match, then same width with the
/// nearest height, then same height with the nearest width, then smallest
/// combined distance. Ties go to the smaller area.
pub fn choose_size(sizes: &[Size], expect: Size, policy: SizePolicy) -> DeviceResult<Size> {
    if sizes.is_empty() || expect.is_empty() {
        return Err(DeviceError::NoSupportedSizes);
    }

    let mut sorted = sizes.to_vec();
    sorted.sort_by_key(|s| s.area());

    let (ew, eh) = (expect.width as u64, expect.height as u64);
    let mut big_enough = Vec::new();
    let mut not_big_enough = Vec::new();
    let mut at_or_above = Vec::new();
    for size in &sorted {
        if size.height as u64 * ew / eh == size.width as u64 {
            if size.width > expect.width && size.height > expect.height {
                big_enough.push(*size);
            } else {
                not_big_enough.push(*size);
            }
            if size.width >= expect.width && size.height >= expect.height {
                at_or_above.push(*size);
            }
        }
    }

    let chosen = match policy {
        SizePolicy::Min => first_min(&not_big_enough),
        SizePolicy::Max => first_max(&big_enough),
        SizePolicy::Lower => match first_max(&not_big_enough) {
            Some(size) => Some(size).filter(|s| accept_below(*s, expect)),
            None => first_min(&big_enough).filter(|s| accept_above(*s, expect)),
        },
        SizePolicy::Larger => match first_min(&at_or_above) {
            Some(size) => Some(size).filter(|s| accept_above(*s, expect)),
            None => first_max(&not_big_enough).filter(|s| accept_below(*s, expect)),
        },
    };

    Ok(chosen.unwrap_or_else(|| closest_size(&sorted, expect)))
}

fn first_min(sizes: &[Size]) -> Option<Size> {
    sizes.iter().copied().min_by_key(|s| s.area())
}

fn first_max(sizes: &[Size]) -> Option<Size> {
    // Reverse so the earliest of equal areas wins
    sizes.iter().rev().copied().max_by_key(|s| s.area())
}

fn accept_below(size: Size, expect: Size) -> bool {
    size.width as f32 / expect.width as f32 >= ACCEPT_RATIO
        && size.height as f32 / expect.height as f32 > ACCEPT_RATIO
}

fn accept_above(size: Size, expect: Size) -> bool {
    expect.width as f32 / size.width as f32 >= ACCEPT_RATIO
        && expect.height as f32 / size.height as f32 >= ACCEPT_RATIO
}

fn closest_size(sorted: &[Size], expect: Size) -> Size {
    if let Some(exact) = sorted.iter().find(|s| **s == expect) {
        return *exact;
    }

    let distance = |a: u32, b: u32| (a as i64 - b as i64).unsigned_abs();

    let same_width = sorted
        .iter()
        .filter(|s| s.width == expect.width)
        .min_by_key(|s| distance(s.height, expect.height));
    if let Some(size) = same_width {
        return *size;
    }

    let same_height = sorted
        .iter()
        .filter(|s| s.height == expect.height)
        .min_by_key(|s| distance(s.width, expect.width));
    if let Some(size) = same_height {
        return *size;
    }

    sorted
        .iter()
        .min_by_key(|s| distance(s.width, expect.width) + distance(s.height, expect.height))
        .copied()
        .unwrap_or(sorted[0])
}

// ============================================
// FRAME RATE
// ============================================

/// A preview FPS range in thousandths of a frame per second.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    pub const fn fixed(thousand_fps: u32) -> Self {
        Self {
            min: thousand_fps,
            max: thousand_fps,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }
}

/// Outcome of [`choose_fixed_fps`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FpsChoice {
    /// Range to program, if a fixed range matched
    pub range: Option<FpsRange>,
    /// Expected frame rate in thousandths
    pub thousand_fps: u32,
}

/// Chooses a fixed preview FPS range equal to `expected`, or guesses the
/// rate the current range will produce.
pub fn choose_fixed_fps(supported: &[FpsRange], current: FpsRange, expected: u32) -> FpsChoice {
    if let Some(range) = supported
        .iter()
        .find(|r| r.is_fixed() && r.min == expected)
    {
        return FpsChoice {
            range: Some(*range),
            thousand_fps: range.min,
        };
    }

    let guess = if current.is_fixed() {
        current.min
    } else {
        current.max / 2
    };
    FpsChoice {
        range: None,
        thousand_fps: guess,
    }
}

// ============================================
// ORIENTATION
// ============================================

/// Rotation (degrees) that makes the preview upright.
///
/// `display_rotation` is the display's rotation in degrees (0/90/180/270).
/// Front cameras are mirrored, so their rotation runs the other way.
pub fn preview_orientation(sensor_orientation: u32, display_rotation: u32, facing: Facing) -> u32 {
    let sensor = sensor_orientation % 360;
    let display = display_rotation % 360;
    match facing {
        Facing::Front => (360 - ((sensor + display) % 360)) % 360,
        Facing::Back => (sensor + 360 - display) % 360,
    }
}

/// Column-major texture matrix for a frame source.
///
/// Rotates texture coordinates about the center by `orientation` degrees
/// and mirrors horizontally for front cameras.
pub fn texture_transform(orientation: u32, mirror: bool) -> [f32; 16] {
    let (sin, cos) = match orientation % 360 {
        90 => (1.0, 0.0),
        180 => (0.0, -1.0),
        270 => (-1.0, 0.0),
        0 => (0.0, 1.0),
        other => {
            let radians = (other as f32).to_radians();
            (radians.sin(), radians.cos())
        }
    };

    // Mirror first: u -> 1 - u
    let (a, c) = if mirror { (-1.0f32, 1.0f32) } else { (1.0, 0.0) };

    // u' = cos*(a*u + c - 0.5) - sin*(v - 0.5) + 0.5
    // v' = sin*(a*u + c - 0.5) + cos*(v - 0.5) + 0.5
    let mut m = [0.0f32; 16];
    m[0] = cos * a;
    m[1] = sin * a;
    m[4] = -sin;
    m[5] = cos;
    m[10] = 1.0;
    m[12] = cos * (c - 0.5) + sin * 0.5 + 0.5;
    m[13] = sin * (c - 0.5) - cos * 0.5 + 0.5;
    m[15] = 1.0;
    m
}

/// Applies a column-major texture matrix to `(u, v)`.
pub fn transform_point(m: &[f32; 16], u: f32, v: f32) -> (f32, f32) {
    (
        m[0] * u + m[4] * v + m[12],
        m[1] * u + m[5] * v + m[13],
    )
}

/// The identity texture matrix.
pub const IDENTITY_MATRIX: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

// ============================================
// FOCUS AREA
// ============================================

/// Rectangle in driver coordinates (-1000..=1000 on both axes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FocusRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Maps a tap on the preview view to a focus rectangle for the driver.
///
/// The rectangle covers `focus_size` of the view on each axis, is kept
/// inside the view, then rotated into sensor orientation.
pub fn tap_area(
    x: f32,
    y: f32,
    view_width: u32,
    view_height: u32,
    focus_size: f32,
    orientation: u32,
) -> FocusRect {
    let (w, h) = (view_width.max(1) as f32, view_height.max(1) as f32);
    let focus_w = w * focus_size.clamp(0.0, 1.0);
    let focus_h = h * focus_size.clamp(0.0, 1.0);
    let left = (x - focus_w / 2.0).clamp(0.0, w - focus_w);
    let top = (y - focus_h / 2.0).clamp(0.0, h - focus_h);

    // View -> centered driver space -> undo sensor rotation
    let to_driver = |px: f32, py: f32| -> (f32, f32) {
        let dx = px / w * 2000.0 - 1000.0;
        let dy = py / h * 2000.0 - 1000.0;
        let radians = -(orientation as f32).to_radians();
        let (sin, cos) = radians.sin_cos();
        (dx * cos - dy * sin, dx * sin + dy * cos)
    };

    let corners = [
        to_driver(left, top),
        to_driver(left + focus_w, top),
        to_driver(left, top + focus_h),
        to_driver(left + focus_w, top + focus_h),
    ];
    let clamp = |v: f32| {
        (v.round() as i32).clamp(-DRIVER_COORDINATE_MAX, DRIVER_COORDINATE_MAX)
    };
    let min_x = corners.iter().map(|c| c.0).fold(f32::MAX, f32::min);
    let max_x = corners.iter().map(|c| c.0).fold(f32::MIN, f32::max);
    let min_y = corners.iter().map(|c| c.1).fold(f32::MAX, f32::min);
    let max_y = corners.iter().map(|c| c.1).fold(f32::MIN, f32::max);

    FocusRect {
        left: clamp(min_x),
        top: clamp(min_y),
        right: clamp(max_x),
        bottom: clamp(max_y),
    }
}

// ============================================
// TESTS
// ============================================
