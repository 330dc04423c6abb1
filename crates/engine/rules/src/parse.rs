//! Literal parsing helpers shared by the loader and the value library

use glam::{EulerRot, Quat, Vec3, Vec4};

/// Split a comma separated list, trimming entries and dropping empty ones
pub fn to_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Split a comma separated list, trimming entries but keeping empty ones
pub fn to_list_with_empty(text: &str) -> Vec<String> {
    text.split(',').map(|s| s.trim().to_string()).collect()
}

pub fn parse_float(text: &str) -> Option<f32> {
    text.trim().parse::<f32>().ok()
}

pub fn parse_int(text: &str) -> Option<i32> {
    text.trim().parse::<i32>().ok()
}

/// Index of the `-` separating a range, ignoring leading and exponent signs
fn range_separator(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    (1..bytes.len()).find(|&i| {
        bytes[i] == b'-' && {
            let prev = bytes[i - 1];
            prev.is_ascii_digit() || prev == b'.' || prev == b' '
        }
    })
}

/// Parse `min-max` or a single value (`min == max`)
pub fn float_range(text: &str) -> Option<(f32, f32)> {
    let text = text.trim();
    match range_separator(text) {
        Some(i) => Some((parse_float(&text[..i])?, parse_float(&text[i + 1..])?)),
        None => parse_float(text).map(|v| (v, v)),
    }
}

/// Parse `min-max` or a single value. A single value yields `(value, None)`.
pub fn int_range(text: &str) -> Option<(i32, Option<i32>)> {
    let text = text.trim();
    match range_separator(text) {
        Some(i) => Some((parse_int(&text[..i])?, Some(parse_int(&text[i + 1..])?))),
        None => parse_int(text).map(|v| (v, None)),
    }
}

/// Parse a vector written in `x,z,y` order
pub fn vec_xzy(parts: &[&str]) -> Option<Vec3> {
    match parts {
        [x, z, y] => Some(Vec3::new(parse_float(x)?, parse_float(y)?, parse_float(z)?)),
        [x, z] => Some(Vec3::new(parse_float(x)?, 0.0, parse_float(z)?)),
        _ => None,
    }
}

/// Parse a rotation written as `yaw,pitch,roll` degrees (`y,x,z`)
pub fn angle_yxz(parts: &[&str]) -> Option<Quat> {
    let degrees = match parts {
        [y] => (parse_float(y)?, 0.0, 0.0),
        [y, x] => (parse_float(y)?, parse_float(x)?, 0.0),
        [y, x, z] => (parse_float(y)?, parse_float(x)?, parse_float(z)?),
        _ => return None,
    };
    Some(quat_from_degrees(degrees.0, degrees.1, degrees.2))
}

pub fn quat_from_degrees(yaw: f32, pitch: f32, roll: f32) -> Quat {
    Quat::from_euler(
        EulerRot::YXZ,
        yaw.to_radians(),
        pitch.to_radians(),
        roll.to_radians(),
    )
}

/// Euler angles in degrees `(yaw, pitch, roll)`, each normalized to `[0, 360)`
pub fn degrees_from_quat(rotation: Quat) -> (f32, f32, f32) {
    let (y, x, z) = rotation.to_euler(EulerRot::YXZ);
    let norm = |r: f32| {
        let d = r.to_degrees().rem_euclid(360.0);
        if (d - 360.0).abs() < 0.0001 {
            0.0
        } else {
            d
        }
    };
    (norm(y), norm(x), norm(z))
}

/// Case-insensitive wildcard match supporting `*`, `pre*`, `*suf` and `*mid*`
pub fn check_wild(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pattern = pattern.to_lowercase();
    let text = text.to_lowercase();
    let starts = pattern.starts_with('*');
    let ends = pattern.len() > 1 && pattern.ends_with('*');
    match (starts, ends) {
        (true, true) => text.contains(&pattern[1..pattern.len() - 1]),
        (true, false) => text.ends_with(&pattern[1..]),
        (false, true) => text.starts_with(&pattern[..pattern.len() - 1]),
        (false, false) => text == pattern,
    }
}

/// Format a number with at most five decimals and no trailing zeros
pub fn format_number(value: f64) -> String {
    let text = format!("{value:.5}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" || text.is_empty() {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Terrain paint color from a preset name or `r,g,b[,a]`.
/// `alpha` fills a missing fourth component.
pub fn parse_paint(text: &str, alpha: f32) -> Option<Vec4> {
    match text.trim().to_lowercase().as_str() {
        "dirt" => return Some(Vec4::new(1.0, 0.0, 0.0, 1.0)),
        "cultivated" => return Some(Vec4::new(0.0, 1.0, 0.0, 1.0)),
        "paved" => return Some(Vec4::new(0.0, 0.0, 1.0, 1.0)),
        "grass" | "reset" => return Some(Vec4::new(0.0, 0.0, 0.0, 1.0)),
        _ => {}
    }
    let parts: Vec<f32> = text.split(',').map(parse_float).collect::<Option<_>>()?;
    match parts.as_slice() {
        [r, g, b] => Some(Vec4::new(*r, *g, *b, alpha)),
        [r, g, b, a] => Some(Vec4::new(*r, *g, *b, *a)),
        _ => None,
    }
}
