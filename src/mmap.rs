use std::fs::File;
use std::ops::Deref;
#[cfg(test)]
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap as Mapping;
use memmap2::MmapOptions;

use crate::Error;
use crate::ErrorExt as _;
use crate::Result;


/// A type encapsulating a read-only mapping of an entire file.
///
/// Clones share the same underlying mapping, which stays alive for as
/// long as any of them does.
#[derive(Clone, Debug)]
pub(crate) struct Mmap {
    /// The actual memory mapping, if any. The kernel does not allow
    /// mapping an empty region, so empty files have none.
    mapping: Option<Arc<Mapping>>,
}

impl Mmap {
    /// Memory map the file at the provided `path`.
    #[cfg(test)]
    pub(crate) fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open `{}`", path.display()))?;
        Self::map(&file)
    }

    /// Map the provided file into memory, in its entirety.
    pub(crate) fn map(file: &File) -> Result<Self> {
        let len = libc::size_t::try_from(file.metadata()?.len())
            .map_err(Error::with_invalid_data)
            .context("file is too large to mmap")?;

        let mapping = if len == 0 {
            None
        } else {
            // SAFETY: We only ever hand out shared references into the
            //         mapping and treat its contents as untrusted input.
            let mapping = unsafe { MmapOptions::new().len(len).map(file) }?;
            Some(Arc::new(mapping))
        };

        Ok(Self { mapping })
    }
}

impl Deref for Mmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        if let Some(mapping) = &self.mapping {
            mapping.deref()
        } else {
            &[]
        }
    }
}
