// ─── ConfigStore: persistencia del blob de configuración ───
//
// Layout de la región:
//
//   [0..4)   magic  "RTK1"
//   [4..6)   largo  u16 little-endian
//   [6..)    bytes  del blob
//
// Orden de escritura en save(): invalidar magic → datos → largo → magic
// → commit. Si algo falla a mitad de camino el magic no coincide y
// load() ve "sin configuración".

use log::{error, info, warn};

use crate::error::StorageError;
use crate::ports::Region;

pub const MAGIC: [u8; 4] = *b"RTK1";
pub const HEADER_LEN: usize = 6;
/// Capacidad declarada de la región (bytes totales, header incluido).
pub const REGION_CAPACITY: usize = 1024;
/// Largos por encima de esto son corrupción aunque quepan en la región.
pub const MAX_PLAUSIBLE_LEN: usize = 1000;

pub struct ConfigStore {
    region: Box<dyn Region>,
}

impl ConfigStore {
    pub fn new(region: Box<dyn Region>) -> Self {
        Self { region }
    }

    fn max_blob_len(&self) -> usize {
        self.region
            .capacity()
            .saturating_sub(HEADER_LEN)
            .min(MAX_PLAUSIBLE_LEN)
    }

    /// Persiste el blob. Solo está "committed" si retorna Ok.
    pub fn save(&mut self, blob: &[u8]) -> Result<(), StorageError> {
        if blob.is_empty() {
            return Err(StorageError::Empty);
        }
        let max = self.max_blob_len();
        if blob.len() > max {
            warn!("Refusing to save {} byte blob (max {})", blob.len(), max);
            return Err(StorageError::TooLarge {
                len: blob.len(),
                max,
            });
        }
        // max ≤ MAX_PLAUSIBLE_LEN < u16::MAX
        let len = blob.len() as u16;

        self.region.write(0, &[0u8; 4])?;
        self.region.write(HEADER_LEN, blob)?;
        self.region.write(4, &len.to_le_bytes())?;
        self.region.write(0, &MAGIC)?;
        self.region.commit()?;

        info!("Configuration saved ({} bytes)", blob.len());
        Ok(())
    }

    /// `Ok(None)` = no hay configuración; `Err(Corrupt)` = magic válido
    /// pero largo imposible.
    pub fn load(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let mut header = [0u8; HEADER_LEN];
        self.region.read(0, &mut header)?;

        if header[..4] != MAGIC {
            return Ok(None);
        }

        let len = u16::from_le_bytes([header[4], header[5]]) as usize;
        let capacity = self.region.capacity().saturating_sub(HEADER_LEN);
        if len == 0 || len > capacity || len > MAX_PLAUSIBLE_LEN {
            error!("Stored configuration is corrupt (length {})", len);
            return Err(StorageError::Corrupt { len });
        }

        let mut blob = vec![0u8; len];
        self.region.read(HEADER_LEN, &mut blob)?;
        Ok(Some(blob))
    }

    /// Factory reset del storage: magic, largo y datos a cero.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        warn!("Clearing stored configuration...");
        let zeros = vec![0u8; self.region.capacity()];
        self.region.write(0, &zeros)?;
        self.region.commit()?;
        info!("Configuration cleared");
        Ok(())
    }
}
