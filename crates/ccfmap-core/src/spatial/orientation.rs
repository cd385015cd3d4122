//! Anatomical orientation codes.
//!
//! A code is three letters from `{R, L, A, P, S, I}`, one per image axis,
//! naming the anatomical side that axis points towards as its index grows.
//! `RAS` means +i points right, +j anterior, +k superior.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Direction;
use crate::error::{MappingError, Result};

/// One anatomical pointing direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnatomicalDirection {
    Right,
    Left,
    Anterior,
    Posterior,
    Superior,
    Inferior,
}

impl AnatomicalDirection {
    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'R' => Some(Self::Right),
            'L' => Some(Self::Left),
            'A' => Some(Self::Anterior),
            'P' => Some(Self::Posterior),
            'S' => Some(Self::Superior),
            'I' => Some(Self::Inferior),
            _ => None,
        }
    }

    fn letter(self) -> char {
        match self {
            Self::Right => 'R',
            Self::Left => 'L',
            Self::Anterior => 'A',
            Self::Posterior => 'P',
            Self::Superior => 'S',
            Self::Inferior => 'I',
        }
    }

    /// Anatomical axis: 0 = left/right, 1 = anterior/posterior,
    /// 2 = superior/inferior.
    pub fn axis(self) -> usize {
        match self {
            Self::Right | Self::Left => 0,
            Self::Anterior | Self::Posterior => 1,
            Self::Superior | Self::Inferior => 2,
        }
    }
}

/// Three-letter orientation code of an image grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Orientation([AnatomicalDirection; 3]);

impl Orientation {
    /// Build from three directions; every anatomical axis must appear once.
    pub fn new(axes: [AnatomicalDirection; 3]) -> Result<Self> {
        let mut seen = [false; 3];
        for a in axes {
            if seen[a.axis()] {
                return Err(MappingError::invalid_configuration(format!(
                    "orientation {} repeats an anatomical axis",
                    axes.iter().map(|a| a.letter()).collect::<String>()
                )));
            }
            seen[a.axis()] = true;
        }
        Ok(Self(axes))
    }

    /// Orientation of a grid whose physical frame is ITK LPS.
    ///
    /// Each axis takes the anatomical side of its dominant direction
    /// component: +x is left, +y posterior, +z superior.
    pub fn from_lps_direction(direction: &Direction<3>) -> Result<Self> {
        let mut axes = [AnatomicalDirection::Right; 3];
        for (j, slot) in axes.iter_mut().enumerate() {
            let (k, v) = direction.dominant_component(j);
            *slot = match (k, v > 0.0) {
                (0, true) => AnatomicalDirection::Left,
                (0, false) => AnatomicalDirection::Right,
                (1, true) => AnatomicalDirection::Posterior,
                (1, false) => AnatomicalDirection::Anterior,
                (_, true) => AnatomicalDirection::Superior,
                (_, false) => AnatomicalDirection::Inferior,
            };
        }
        Self::new(axes)
    }

    /// Axes of the code.
    pub fn axes(&self) -> [AnatomicalDirection; 3] {
        self.0
    }

    /// Index mapping from grids in this orientation to grids in `target`.
    ///
    /// Entry `j` is `(source_axis, flip)`: target axis `j` reads source axis
    /// `source_axis`, reversed when `flip` is set.
    pub fn mapping_to(&self, target: &Orientation) -> [(usize, bool); 3] {
        let mut out = [(0, false); 3];
        for (j, t) in target.0.iter().enumerate() {
            // Construction guarantees every anatomical axis is present once.
            let i = self.0.iter().position(|s| s.axis() == t.axis()).unwrap_or(j);
            out[j] = (i, self.0[i] != *t);
        }
        out
    }
}

impl FromStr for Orientation {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self> {
        let letters: Vec<char> = s.trim().chars().collect();
        if letters.len() != 3 {
            return Err(MappingError::invalid_configuration(format!(
                "orientation code must have three letters, got {s:?}"
            )));
        }
        let mut axes = [AnatomicalDirection::Right; 3];
        for (slot, c) in axes.iter_mut().zip(letters) {
            *slot = AnatomicalDirection::from_letter(c).ok_or_else(|| {
                MappingError::invalid_configuration(format!("unknown orientation letter {c:?} in {s:?}"))
            })?;
        }
        Self::new(axes)
    }
}

impl TryFrom<String> for Orientation {
    type Error = MappingError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Orientation> for String {
    fn from(value: Orientation) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in self.0 {
            write!(f, "{}", a.letter())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let o: Orientation = "spr".parse().unwrap();
        assert_eq!(o.to_string(), "SPR");
        assert!("SPX".parse::<Orientation>().is_err());
        assert!("RLS".parse::<Orientation>().is_err());
        assert!("RA".parse::<Orientation>().is_err());
    }

    #[test]
    fn test_identity_nifti_header_is_ras() {
        // RAS header converted to LPS negates the first two axes.
        let mut dir = Direction::<3>::identity();
        dir[(0, 0)] = -1.0;
        dir[(1, 1)] = -1.0;
        let o = Orientation::from_lps_direction(&dir).unwrap();
        assert_eq!(o.to_string(), "RAS");
    }

    #[test]
    fn test_mapping_permutes_and_flips() {
        let src: Orientation = "SPR".parse().unwrap();
        let dst: Orientation = "RAS".parse().unwrap();
        let m = src.mapping_to(&dst);
        // R <- axis 2 as-is, A <- axis 1 flipped, S <- axis 0 as-is
        assert_eq!(m, [(2, false), (1, true), (0, false)]);
        assert_eq!(dst.mapping_to(&dst), [(0, false), (1, false), (2, false)]);
    }
}
