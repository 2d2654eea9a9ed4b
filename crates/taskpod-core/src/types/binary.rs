//! Constraint checks shared by the binary kinds (file, image, WSI).

use super::{TypeValidationError, ValidationCode};
use crate::formats::FileFormat;

/// Limits declared on a binary parameter.
pub(super) struct BinaryLimits<'a> {
    /// Declared format names. Names that cannot be sniffed are not enforced.
    pub formats: &'a [String],
    /// Formats the content must match when none are declared. Empty means any.
    pub fallback: &'a [FileFormat],
    pub max_file_size: Option<u64>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

impl BinaryLimits<'_> {
    pub fn check(&self, bytes: &[u8]) -> Result<(), TypeValidationError> {
        if let Some(max) = self.max_file_size {
            let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
            if size > max {
                return Err(TypeValidationError::new(
                    ValidationCode::FileTooLarge,
                    format!("content is {size} bytes, limit is {max}"),
                ));
            }
        }

        let declared: Vec<FileFormat> = self
            .formats
            .iter()
            .filter_map(|name| FileFormat::from_name(name))
            .collect();
        // Content cannot be ruled out against a format we cannot sniff.
        let enforced = if self.formats.is_empty() {
            !self.fallback.is_empty()
        } else {
            declared.len() == self.formats.len()
        };
        let accepted: &[FileFormat] = if self.formats.is_empty() {
            self.fallback
        } else {
            &declared
        };

        let detected = FileFormat::detect(bytes);
        if enforced && !detected.is_some_and(|format| accepted.contains(&format)) {
            return Err(TypeValidationError::new(
                ValidationCode::FormatMismatch,
                format!("content format {detected:?} is not one of {accepted:?}"),
            ));
        }

        if self.max_width.is_none() && self.max_height.is_none() {
            return Ok(());
        }
        let Some((width, height)) = detected.and_then(|format| format.dimensions(bytes)) else {
            return Ok(());
        };
        let too_wide = self.max_width.is_some_and(|max| width > max);
        let too_tall = self.max_height.is_some_and(|max| height > max);
        if too_wide || too_tall {
            return Err(TypeValidationError::new(
                ValidationCode::DimensionsTooLarge,
                format!(
                    "dimensions {width}x{height} exceed {}x{}",
                    self.max_width.map_or("*".to_string(), |w| w.to_string()),
                    self.max_height.map_or("*".to_string(), |h| h.to_string()),
                ),
            ));
        }
        Ok(())
    }
}
