// ─── Región de configuración sobre NVS ───
//
// NVS (Non-Volatile Storage) es la "flash persistente" del ESP32.
// Acá no guardamos claves sueltas: guardamos UNA imagen de bytes de
// capacidad fija (un blob raw) y ConfigStore arma su formato adentro.
//
// write() solo toca la copia en RAM; commit() la escribe entera en NVS.
// Si la escritura falla, la copia en RAM vuelve a la última confirmada.

use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use log::{info, warn};
use zeroize::Zeroize;

use rfid_tracker::error::StorageError;
use rfid_tracker::ports::Region;

// ─── Constantes NVS ───

const NVS_NAMESPACE: &str = "tracker";
const KEY_IMAGE: &str = "cfg_image";

pub struct NvsRegion {
    nvs: EspNvs<NvsDefault>,
    pending: Vec<u8>,
    committed: Vec<u8>,
}

impl NvsRegion {
    /// Abre el namespace y carga la imagen guardada (o una en ceros).
    /// `true` en EspNvs::new = crear namespace si no existe.
    pub fn new(nvs_partition: EspNvsPartition<NvsDefault>, capacity: usize) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(nvs_partition, NVS_NAMESPACE, true)?;

        let mut image = vec![0u8; capacity];
        let stored_len = match nvs.get_raw(KEY_IMAGE, &mut image) {
            Ok(stored) => stored.map(|s| s.len()),
            Err(e) => {
                warn!("Error reading NVS image: {:?}", e);
                Some(0)
            }
        };
        match stored_len {
            Some(len) if len == capacity => {}
            Some(len) => {
                warn!("Stored image has {} bytes, expected {}; starting blank", len, capacity);
                image.fill(0);
            }
            None => info!("No configuration image in NVS yet"),
        }

        info!("NvsRegion initialized with namespace: {}", NVS_NAMESPACE);
        Ok(Self {
            nvs,
            committed: image.clone(),
            pending: image,
        })
    }

    fn bounds(&self, offset: usize, len: usize) -> Result<(), StorageError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.pending.len() => Ok(()),
            _ => Err(StorageError::OutOfBounds {
                offset,
                len,
                capacity: self.pending.len(),
            }),
        }
    }
}

impl Region for NvsRegion {
    fn capacity(&self) -> usize {
        self.pending.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.bounds(offset, buf.len())?;
        buf.copy_from_slice(&self.pending[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        self.bounds(offset, data.len())?;
        self.pending[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if let Err(e) = self.nvs.set_raw(KEY_IMAGE, &self.pending) {
            self.pending.copy_from_slice(&self.committed);
            return Err(StorageError::Device(format!("{e:?}")));
        }
        self.committed.copy_from_slice(&self.pending);
        Ok(())
    }
}

impl Drop for NvsRegion {
    // La imagen contiene el password WiFi
    fn drop(&mut self) {
        self.pending.zeroize();
        self.committed.zeroize();
    }
}
