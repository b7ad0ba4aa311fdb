use crate::constraints::Constraints;
use crate::size_limit::SizeLimit;

/// Upper bounds applied to one multipart body.
///
/// Every limit defaults to "unbounded". Counts are inclusive: a limit of `2`
/// accepts two files and rejects the third.
///
/// # Examples
///
/// ```
/// use multer_upload::Limits;
///
/// let limits = Limits::new()
///     .max_file_size(5 * 1024 * 1024)
///     .max_files(4)
///     .max_field_size(16 * 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct Limits {
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
    /// Most file parts accepted.
    pub max_files: usize,
    /// Largest accepted text field value, in bytes.
    pub max_field_size: u64,
    /// Most text fields accepted.
    pub max_field_count: usize,
    /// Most parts of any kind accepted.
    pub max_parts: usize,
    /// Largest accepted raw body, in bytes.
    pub max_total_size: u64,
}

impl Limits {
    pub fn new() -> Limits {
        Limits::default()
    }

    pub fn max_file_size(self, limit: u64) -> Limits {
        Limits {
            max_file_size: limit,
            ..self
        }
    }

    pub fn max_files(self, limit: usize) -> Limits {
        Limits {
            max_files: limit,
            ..self
        }
    }

    pub fn max_field_size(self, limit: u64) -> Limits {
        Limits {
            max_field_size: limit,
            ..self
        }
    }

    pub fn max_field_count(self, limit: usize) -> Limits {
        Limits {
            max_field_count: limit,
            ..self
        }
    }

    pub fn max_parts(self, limit: usize) -> Limits {
        Limits {
            max_parts: limit,
            ..self
        }
    }

    pub fn max_total_size(self, limit: u64) -> Limits {
        Limits {
            max_total_size: limit,
            ..self
        }
    }

    /// The tokenizer-level rules these limits imply: only the whole-body size
    /// is checked there, everything else is enforced per part.
    pub(crate) fn constraints(&self) -> Constraints {
        Constraints::new().size_limit(SizeLimit::new().whole_stream(self.max_total_size))
    }
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_file_size: u64::MAX,
            max_files: usize::MAX,
            max_field_size: u64::MAX,
            max_field_count: usize::MAX,
            max_parts: usize::MAX,
            max_total_size: u64::MAX,
        }
    }
}

/// Running counters for a single parse.
///
/// Each parse owns its own enforcer, so concurrent parses never share counts.
#[derive(Debug)]
pub struct LimitEnforcer {
    limits: Limits,
    part_count: usize,
    file_count: usize,
    field_count: usize,
    total_bytes: u64,
    current_part_bytes: u64,
}

impl LimitEnforcer {
    pub fn new(limits: Limits) -> LimitEnforcer {
        LimitEnforcer {
            limits,
            part_count: 0,
            file_count: 0,
            field_count: 0,
            total_bytes: 0,
            current_part_bytes: 0,
        }
    }

    /// Counts a new part of any kind.
    pub fn begin_part(&mut self) -> crate::Result<()> {
        if self.part_count >= self.limits.max_parts {
            return Err(crate::Error::TooManyParts {
                limit: self.limits.max_parts,
            });
        }

        self.part_count += 1;
        self.current_part_bytes = 0;
        Ok(())
    }

    /// Accepts a new file part, failing if it would exceed `max_files`.
    pub fn begin_file(&mut self) -> crate::Result<()> {
        if self.file_count >= self.limits.max_files {
            return Err(crate::Error::TooManyFiles {
                limit: self.limits.max_files,
                field_name: None,
            });
        }

        self.file_count += 1;
        self.current_part_bytes = 0;
        Ok(())
    }

    /// Accepts a new text field, failing if it would exceed `max_field_count`.
    pub fn begin_field(&mut self) -> crate::Result<()> {
        if self.field_count >= self.limits.max_field_count {
            return Err(crate::Error::TooManyFields {
                limit: self.limits.max_field_count,
            });
        }

        self.field_count += 1;
        self.current_part_bytes = 0;
        Ok(())
    }

    /// Adds `len` bytes to the file being stored.
    pub fn record_file_chunk(&mut self, field_name: &str, len: usize) -> crate::Result<()> {
        self.record(len)?;

        if self.current_part_bytes > self.limits.max_file_size {
            return Err(crate::Error::FileTooLarge {
                limit: self.limits.max_file_size,
                field_name: field_name.to_owned(),
            });
        }

        Ok(())
    }

    /// Adds `len` bytes to the field being decoded.
    pub fn record_field_chunk(&mut self, field_name: &str, len: usize) -> crate::Result<()> {
        self.record(len)?;

        if self.current_part_bytes > self.limits.max_field_size {
            return Err(crate::Error::FieldTooLarge {
                limit: self.limits.max_field_size,
                field_name: field_name.to_owned(),
            });
        }

        Ok(())
    }

    // Part bodies never outgrow the raw stream, so this also holds when the
    // tokenizer was built without a whole-stream limit.
    fn record(&mut self, len: usize) -> crate::Result<()> {
        self.current_part_bytes += len as u64;
        self.total_bytes += len as u64;

        if self.total_bytes > self.limits.max_total_size {
            return Err(crate::Error::StreamSizeExceeded {
                limit: self.limits.max_total_size,
            });
        }

        Ok(())
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Part body bytes seen so far, across all parts.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Bytes seen so far for the current part.
    pub fn current_part_bytes(&self) -> u64 {
        self.current_part_bytes
    }
}
