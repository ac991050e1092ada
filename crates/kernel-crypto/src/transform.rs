//! `Transformation` plugin wrapping the chunked cipher stream so the
//! pipeline engine can treat encryption like any other transform step.

use std::sync::Arc;

use futures::future::BoxFuture;
use kernel_common::error::{KernelError, Result};
use kernel_common::traits::{Keyring, Transformation, TransformContext};
use kernel_common::PluginCategory;

use crate::keymanager::{CipherKeyPair, CHUNK_KEY_SIZE};
use crate::stream::{decrypt_all, ChunkedCipherWriter};

fn key_pair_for(keyring: &dyn Keyring, key_id: &str) -> Result<CipherKeyPair> {
    let bytes = keyring.key_bytes(key_id)?;
    let array: [u8; CHUNK_KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| KernelError::internal("key material has wrong length for chunked cipher"))?;
    Ok(CipherKeyPair::from_bytes(array))
}

/// `spec.md` §4.6's `"Encryption"` pipeline step. `TransformContext.key`, if
/// set, carries a pre-resolved key id as UTF-8 bytes; otherwise the
/// keyring's current key is used.
pub struct EncryptionTransform {
    plugin_id: String,
    keyring: Arc<dyn Keyring>,
}

impl EncryptionTransform {
    pub fn new(plugin_id: impl Into<String>, keyring: Arc<dyn Keyring>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            keyring,
        }
    }

    fn resolve_key_id(&self, ctx: &TransformContext) -> String {
        ctx.key
            .as_ref()
            .and_then(|bytes| String::from_utf8(bytes.clone()).ok())
            .unwrap_or_else(|| self.keyring.current_key_id())
    }
}

impl Transformation for EncryptionTransform {
    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Transformation
    }

    fn step_name(&self) -> &str {
        "Encryption"
    }

    fn quality_level(&self) -> u32 {
        100
    }

    fn on_write<'a>(
        &'a self,
        input: Vec<u8>,
        ctx: &'a TransformContext,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let key_id = self.resolve_key_id(ctx);
            let key_pair = key_pair_for(self.keyring.as_ref(), &key_id)?;
            let context_id = ctx.manifest_id.to_hex();
            let mut writer = ChunkedCipherWriter::new(key_pair, context_id.into_bytes());
            writer
                .write(&input)
                .map_err(|e| KernelError::internal(e.to_string()))?;
            writer.finish().map_err(|e| KernelError::internal(e.to_string()))
        })
    }

    fn on_read<'a>(
        &'a self,
        input: Vec<u8>,
        ctx: &'a TransformContext,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let key_id = self.resolve_key_id(ctx);
            let key_pair = key_pair_for(self.keyring.as_ref(), &key_id)?;
            let context_id = ctx.manifest_id.to_hex();
            decrypt_all(&key_pair, context_id.as_bytes(), &input)
                .map_err(|e| KernelError::internal(e.to_string()))
        })
    }
}
