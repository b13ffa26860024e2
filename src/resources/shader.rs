//! Shader modules and raw binary resource reading.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::backend::{check_result, BackendError, BackendResult, ShaderModuleHandle};
use crate::device::Device;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// A compiled SPIR-V shader module.
#[derive(Default)]
pub struct ShaderModule {
    handle: Option<ShaderModuleHandle>,
}

impl ShaderModule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&mut self, device: &Device, code: &[u32]) -> BackendResult<()> {
        debug_assert!(
            self.handle.is_none(),
            "ShaderModule initialized twice without release"
        );
        self.handle = Some(check_result(
            device.backend().create_shader_module(code),
            "create shader module",
        )?);
        Ok(())
    }

    /// Creates the module from little-endian SPIR-V bytes.
    pub fn initialize_from_bytes(&mut self, device: &Device, bytes: &[u8]) -> BackendResult<()> {
        let code = check_result(spirv_words(bytes), "decode SPIR-V")?;
        self.initialize(device, &code)
    }

    pub fn release(&mut self, device: &Device) {
        debug_assert!(self.handle.is_some(), "ShaderModule released before initialize");
        if let Some(handle) = self.handle.take() {
            device.backend().destroy_shader_module(handle);
        }
    }

    pub fn get(&self) -> ShaderModuleHandle {
        debug_assert!(self.handle.is_some(), "ShaderModule used before initialize");
        self.handle.unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            log::warn!("ShaderModule {:?} dropped without release", handle);
        }
    }
}

/// Splits SPIR-V bytes into words, checking length and magic number.
pub fn spirv_words(bytes: &[u8]) -> BackendResult<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(BackendError::ShaderCreationFailed(format!(
            "SPIR-V length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        _ => Err(BackendError::ShaderCreationFailed(
            "missing SPIR-V magic number".into(),
        )),
    }
}

/// A file of opaque binary resources, read by offset and size.
#[derive(Debug)]
pub struct BinaryFile {
    path: PathBuf,
    file: File,
    size: u64,
}

impl BinaryFile {
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| BackendError::Io(format!("{}: {}", path.display(), e)))?;
        let size = file
            .metadata()
            .map_err(|e| BackendError::Io(format!("{}: {}", path.display(), e)))?
            .len();
        Ok(Self { path, file, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads exactly `size` bytes starting at `offset`.
    pub fn read(&mut self, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        if offset.checked_add(size).map_or(true, |end| end > self.size) {
            return Err(BackendError::Io(format!(
                "{}: read of {} bytes at {} exceeds file size {}",
                self.path.display(),
                size,
                offset,
                self.size
            )));
        }
        let mut data = vec![0u8; size as usize];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut data))
            .map_err(|e| BackendError::Io(format!("{}: {}", self.path.display(), e)))?;
        Ok(data)
    }

    /// Reads the whole file.
    pub fn read_all(&mut self) -> BackendResult<Vec<u8>> {
        self.read(0, self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "render_core_{}_{}",
            std::process::id(),
            name
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn test_binary_file_reads_at_offset() {
        let path = temp_file("offset.bin", &[0, 1, 2, 3, 4, 5, 6, 7]);
        let mut file = BinaryFile::open(&path).unwrap();
        assert_eq!(file.size(), 8);
        assert_eq!(file.read(2, 3).unwrap(), vec![2, 3, 4]);
        assert_eq!(file.read(0, 1).unwrap(), vec![0]);
        assert!(file.read(6, 4).is_err());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_binary_file_missing() {
        assert!(matches!(
            BinaryFile::open("/nonexistent/render_core.bin"),
            Err(BackendError::Io(_))
        ));
    }

    #[test]
    fn test_spirv_words() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        assert_eq!(spirv_words(&bytes).unwrap(), vec![SPIRV_MAGIC, 7]);
        assert!(spirv_words(&bytes[..5]).is_err());
        assert!(spirv_words(&[0; 8]).is_err());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_shader_module_lifecycle() {
        let (backend, device, _allocator) = crate::resources::test_support::dummy_device();
        let mut module = ShaderModule::new();
        module
            .initialize_from_bytes(&device, &SPIRV_MAGIC.to_le_bytes())
            .unwrap();
        assert!(!module.get().is_null());
        module.release(&device);
        assert_eq!(backend.live_object_count(), 0);
    }
}
