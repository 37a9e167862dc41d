use crate::{Error, ErrorExt};

#[derive(Debug, thiserror::Error)]
pub enum StringArrayError {
    #[error("Nul byte in string at position {0}")]
    Nul(usize),
    #[error("Number of elements exceeds 2^32")]
    NumberElements,
    #[error("Element size exceeds 2^32")]
    ElementSize,
    #[error("Cumulative size exceeds 2^32")]
    CumulativeSize,
}

/// An ordered list of strings as the guest sees them: each one followed by a
/// NUL in a single flat buffer.
#[derive(Debug, Clone, Default)]
pub struct StringArray {
    elems: Vec<String>,
}

impl StringArray {
    pub fn new() -> Self {
        StringArray { elems: Vec::new() }
    }

    pub fn push(&mut self, elem: String) -> Result<(), StringArrayError> {
        if self.elems.len() + 1 > u32::MAX as usize {
            return Err(StringArrayError::NumberElements);
        }
        if elem.len() + 1 > u32::MAX as usize {
            return Err(StringArrayError::ElementSize);
        }
        if self.cumulative_size() as usize + elem.len() + 1 > u32::MAX as usize {
            return Err(StringArrayError::CumulativeSize);
        }
        if let Some(pos) = elem.find('\0') {
            return Err(StringArrayError::Nul(pos));
        }
        self.elems.push(elem);
        Ok(())
    }

    pub fn number_elements(&self) -> u32 {
        self.elems.len() as u32
    }

    /// Bytes needed to hold every element and its terminating NUL.
    pub fn cumulative_size(&self) -> u32 {
        self.elems
            .iter()
            .map(|e| e.len() + 1)
            .sum::<usize>()
            .try_into()
            .unwrap_or(u32::MAX)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.elems.iter().map(String::as_str)
    }

    /// Write every element NUL-terminated into `buf`, returning the offset of
    /// each within it.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<Vec<u32>, Error> {
        if buf.len() < self.cumulative_size() as usize {
            return Err(Error::invalid_argument().context(format!(
                "buffer of {} bytes cannot hold {} bytes of strings",
                buf.len(),
                self.cumulative_size()
            )));
        }
        let mut offsets = Vec::with_capacity(self.elems.len());
        let mut cursor = 0;
        for elem in &self.elems {
            offsets.push(u32::try_from(cursor)?);
            let bytes = elem.as_bytes();
            buf[cursor..cursor + bytes.len()].copy_from_slice(bytes);
            buf[cursor + bytes.len()] = 0;
            cursor += bytes.len() + 1;
        }
        Ok(offsets)
    }
}
