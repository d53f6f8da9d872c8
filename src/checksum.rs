//! Checksum computation for the document pipeline's deduplication step
//! (spec.md §3, §4.6 step 2). The algorithm set is a plain string tag
//! (`"sha256"`, `"md5"`) matching `indexOptions.checksumAlgorithms`;
//! `sha2`/`md5` here are the same crates the `meilisearch` pack member
//! reaches for (its auth store hashes API keys with `sha2::Sha256`).

use md5::{Digest as Md5Digest, Md5};
use sha2::{Digest as Sha2Digest, Sha256};

use crate::document::IndexOptions;
use crate::error::{Result, ValidationError};
use crate::schema::SchemaHandler;

/// Computes one `"<algo>/<hex>"` checksum per configured algorithm over
/// the concatenation of every `checksum_fields` value extracted from
/// `data`, in field order — the algorithm × field cross product described
/// in spec.md §4.6 step 2 collapses to one digest per algorithm because a
/// digest already mixes every input byte it's fed.
pub fn compute(handler: &dyn SchemaHandler, data: &serde_json::Value, options: &IndexOptions) -> Result<Vec<(String, String)>> {
    if options.checksum_algorithms.is_empty() || options.checksum_fields.is_empty() {
        return Ok(Vec::new());
    }

    let fields = handler.extract_checksum_fields(data, options)?;
    let joined = fields.join("\u{1}");

    let mut out = Vec::with_capacity(options.checksum_algorithms.len());
    for algorithm in &options.checksum_algorithms {
        let hex = digest_hex(algorithm, joined.as_bytes())?;
        out.push((algorithm.clone(), hex));
    }
    Ok(out)
}

fn digest_hex(algorithm: &str, bytes: &[u8]) -> Result<String> {
    match algorithm {
        "sha256" => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            Ok(hex::encode(hasher.finalize()))
        }
        "md5" => {
            let mut hasher = Md5::new();
            hasher.update(bytes);
            Ok(hex::encode(hasher.finalize()))
        }
        other => Err(ValidationError::Other(format!("unsupported checksum algorithm `{other}`")).into()),
    }
}
