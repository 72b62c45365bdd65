use std::{borrow::Borrow, fmt};

use crate::foundation::error::{ReelError, ReelResult};

/// One gloss token, e.g. `HELLO`.
///
/// Tokens are trimmed and uppercased on construction so catalog matching is case-insensitive.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(raw: impl AsRef<str>) -> ReelResult<Self> {
        let t = raw.as_ref().trim();
        if t.is_empty() {
            return Err(ReelError::validation("token must be non-empty"));
        }
        Ok(Self(t.to_uppercase()))
    }

    /// Parse a whole upstream token sequence, failing on the first empty token.
    pub fn parse_all<I, S>(raw: I) -> ReelResult<Vec<Self>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter().map(Self::new).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Token {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    pub num: u32,
    pub den: u32, // must be > 0
}

impl Fps {
    pub fn new(num: u32, den: u32) -> ReelResult<Self> {
        if den == 0 {
            return Err(ReelError::validation("Fps den must be > 0"));
        }
        if num == 0 {
            return Err(ReelError::validation("Fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Parse ffprobe-style rates such as `25/1`, `30000/1001` or `25`.
    pub fn parse_ratio(s: &str) -> ReelResult<Self> {
        let s = s.trim();
        let (num, den) = match s.split_once('/') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s, "1"),
        };
        let num = num
            .parse::<u32>()
            .map_err(|e| ReelError::validation(format!("invalid frame rate '{s}': {e}")))?;
        let den = den
            .parse::<u32>()
            .map_err(|e| ReelError::validation(format!("invalid frame rate '{s}': {e}")))?;
        Self::new(num, den)
    }

    /// Rates closer than 1/100 fps are treated as the same rate.
    pub fn approx_eq(self, other: Fps) -> bool {
        (self.as_f64() - other.as_f64()).abs() < 0.01
    }
}

impl fmt::Display for Fps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

/// Resolution and frame rate every composed segment is normalized to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OutputFormat {
    pub canvas: Canvas,
    pub fps: Fps,
}

impl OutputFormat {
    pub fn new(width: u32, height: u32, fps: u32) -> ReelResult<Self> {
        if width == 0 || height == 0 {
            return Err(ReelError::validation("output width/height must be non-zero"));
        }
        // h264 + yuv420p needs even dimensions.
        if !width.is_multiple_of(2) || !height.is_multiple_of(2) {
            return Err(ReelError::validation("output width/height must be even"));
        }
        Ok(Self {
            canvas: Canvas { width, height },
            fps: Fps::new(fps, 1)?,
        })
    }

    /// `true` when a source with this geometry and rate needs no normalization.
    pub fn conforms(&self, canvas: Canvas, fps: Fps) -> bool {
        self.canvas == canvas && self.fps.approx_eq(fps)
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            canvas: Canvas {
                width: 1280,
                height: 720,
            },
            fps: Fps { num: 25, den: 1 },
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
