// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A file-backed [`ConfigStore`], standing in for the flash/EEPROM page a
//! real board would use to persist `++savecfg`.

use std::fs;
use std::path::PathBuf;

use gpib_config::{ConfigError, ConfigStore, BLOB_LEN};

pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: PathBuf) -> Self {
        FileConfigStore { path }
    }
}

impl ConfigStore for FileConfigStore {
    fn read_blob(&mut self, buf: &mut [u8; BLOB_LEN]) -> Result<(), ConfigError> {
        let data = fs::read(&self.path).map_err(|_| ConfigError::StoreFailure)?;
        if data.len() != BLOB_LEN {
            return Err(ConfigError::ShortRead);
        }
        buf.copy_from_slice(&data);
        Ok(())
    }

    fn write_blob(&mut self, buf: &[u8; BLOB_LEN]) -> Result<(), ConfigError> {
        fs::write(&self.path, buf).map_err(|_| ConfigError::StoreFailure)
    }
}
