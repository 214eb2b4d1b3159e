use std::env;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose, Engine as _};
use palmgate_config::DEFAULT_STORE_DIR;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::errors::{AppError, AppResult};
use crate::hands::extractor::FeatureVector;
use crate::hands::landmarks::Handedness;
use crate::hands::matcher::EnrollmentTemplate;

const TEMPLATE_STORE_ENV: &str = "PALMGATE_STORE_DIR";
const STORE_VERSION: u32 = 1;
const STORE_ALGORITHM: &str = "AES-256-GCM";
const STORE_NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrolledSample {
    pub id: String,
    pub features: FeatureVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
    pub source: String,
    pub created_at: String,
}

/// Everything persisted for one enrolled identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredTemplate {
    pub user: String,
    #[serde(default)]
    pub handedness: Option<Handedness>,
    pub samples: Vec<EnrolledSample>,
    pub updated_at: String,
}

impl StoredTemplate {
    pub fn feature_len(&self) -> Option<usize> {
        self.samples.first().map(|sample| sample.features.len())
    }

    pub fn to_enrollment_template(&self) -> EnrollmentTemplate {
        EnrollmentTemplate {
            vectors: self
                .samples
                .iter()
                .map(|sample| sample.features.clone())
                .collect(),
            handedness: self.handedness,
            embeddings: self
                .samples
                .iter()
                .filter_map(|sample| sample.embedding.clone())
                .collect(),
        }
    }
}

pub trait TemplateStore {
    fn load(&self, path: &Path, key: Option<&[u8]>) -> AppResult<Option<StoredTemplate>>;
    fn save(&self, path: &Path, template: &StoredTemplate, key: Option<&[u8]>) -> AppResult<()>;
    fn delete(&self, path: &Path) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemTemplateStore;

impl TemplateStore for FilesystemTemplateStore {
    fn load(&self, path: &Path, key: Option<&[u8]>) -> AppResult<Option<StoredTemplate>> {
        read_template_store(path, key)
    }

    fn save(&self, path: &Path, template: &StoredTemplate, key: Option<&[u8]>) -> AppResult<()> {
        write_template_store(path, template, key)
    }

    fn delete(&self, path: &Path) -> AppResult<()> {
        if path.exists() {
            fs::remove_file(path).map_err(|source| AppError::FeatureWrite {
                path: path.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}

pub trait StoreDirResolver {
    fn resolve(&self, override_dir: Option<&Path>) -> PathBuf;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvStoreDirResolver;

impl StoreDirResolver for EnvStoreDirResolver {
    fn resolve(&self, override_dir: Option<&Path>) -> PathBuf {
        if let Some(dir) = override_dir {
            dir.to_path_buf()
        } else if let Ok(env_value) = env::var(TEMPLATE_STORE_ENV) {
            PathBuf::from(env_value)
        } else {
            PathBuf::from(DEFAULT_STORE_DIR)
        }
    }
}

pub fn user_store_path<R: StoreDirResolver>(
    resolver: &R,
    store_dir: Option<&Path>,
    user: &str,
) -> PathBuf {
    resolver.resolve(store_dir).join(format!("{user}.json"))
}

pub fn read_template_store(path: &Path, key: Option<&[u8]>) -> AppResult<Option<StoredTemplate>> {
    if !path.exists() {
        return Ok(None);
    }

    let data = fs::read(path).map_err(|source| AppError::FeatureRead {
        path: path.to_path_buf(),
        source,
    })?;

    let template = if let Ok(wrapper) = serde_json::from_slice::<EncryptedTemplateStore>(&data) {
        decrypt_encrypted_store(path, wrapper, key)?
    } else {
        serde_json::from_slice(&data).map_err(|err| AppError::InvalidTemplate {
            path: path.to_path_buf(),
            message: format!("invalid template store contents: {err}"),
        })?
    };

    validate_template(&template, path)?;
    Ok(Some(template))
}

pub fn write_template_store(
    path: &Path,
    template: &StoredTemplate,
    key: Option<&[u8]>,
) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| AppError::FeatureWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent).map_err(|source| AppError::FeatureWrite {
        path: path.to_path_buf(),
        source,
    })?;

    {
        let file = tmp.as_file_mut();
        {
            let mut writer = BufWriter::new(&mut *file);
            let serialized = match key {
                Some(key_bytes) => serialize_encrypted_store(template, key_bytes)?,
                None => serde_json::to_vec_pretty(template)?,
            };
            writer
                .write_all(&serialized)
                .and_then(|_| writer.write_all(b"\n"))
                .and_then(|_| writer.flush())
                .map_err(|source| AppError::FeatureWrite {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        file.sync_all().map_err(|source| AppError::FeatureWrite {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let file = tmp.persist(path).map_err(|err| AppError::FeatureWrite {
        path: path.to_path_buf(),
        source: err.error,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|source| AppError::FeatureWrite {
                path: path.to_path_buf(),
                source,
            })?;
    }
    #[cfg(not(unix))]
    drop(file);

    Ok(())
}

/// Checks the uniform-length invariants the matcher relies on.
pub fn validate_template(template: &StoredTemplate, path: &Path) -> AppResult<()> {
    let Some(expected) = template.feature_len() else {
        return Ok(());
    };
    if expected == 0 {
        return Err(AppError::InvalidTemplate {
            path: path.to_path_buf(),
            message: "feature vectors are empty".into(),
        });
    }

    let mut embedding_len = None;
    for (idx, sample) in template.samples.iter().enumerate() {
        if sample.features.len() != expected {
            return Err(AppError::InvalidTemplate {
                path: path.to_path_buf(),
                message: format!(
                    "feature length mismatch at sample {} (expected {}, found {})",
                    idx,
                    expected,
                    sample.features.len()
                ),
            });
        }
        if let Some(embedding) = &sample.embedding {
            match embedding_len {
                None => embedding_len = Some(embedding.len()),
                Some(len) if len != embedding.len() => {
                    return Err(AppError::InvalidTemplate {
                        path: path.to_path_buf(),
                        message: format!(
                            "embedding length mismatch at sample {idx} (expected {len}, found {})",
                            embedding.len()
                        ),
                    });
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

fn serialize_encrypted_store(template: &StoredTemplate, key: &[u8]) -> AppResult<Vec<u8>> {
    let plaintext = serde_json::to_vec(template)?;
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| AppError::Encryption("invalid AES-GCM key length".into()))?;
    let mut nonce = [0u8; STORE_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
        .map_err(|err| AppError::Encryption(format!("failed to encrypt template store: {err}")))?;
    let wrapper = EncryptedTemplateStore {
        version: STORE_VERSION,
        algorithm: STORE_ALGORITHM.to_string(),
        nonce: general_purpose::STANDARD.encode(nonce),
        ciphertext: general_purpose::STANDARD.encode(ciphertext),
    };
    serde_json::to_vec_pretty(&wrapper).map_err(AppError::from)
}

fn decrypt_encrypted_store(
    path: &Path,
    wrapper: EncryptedTemplateStore,
    key: Option<&[u8]>,
) -> AppResult<StoredTemplate> {
    if wrapper.algorithm != STORE_ALGORITHM {
        return Err(AppError::Encryption(format!(
            "unsupported template store algorithm '{}'",
            wrapper.algorithm
        )));
    }
    if wrapper.version != STORE_VERSION {
        return Err(AppError::Encryption(format!(
            "unsupported template store version {}",
            wrapper.version
        )));
    }

    let key_bytes = key.ok_or_else(|| AppError::EncryptedStoreRequiresKey {
        path: path.to_path_buf(),
    })?;

    let nonce_bytes = general_purpose::STANDARD
        .decode(wrapper.nonce.trim())
        .map_err(|err| AppError::Encryption(format!("invalid nonce encoding: {err}")))?;
    if nonce_bytes.len() != STORE_NONCE_LEN {
        return Err(AppError::Encryption(format!(
            "expected nonce of {} bytes but found {}",
            STORE_NONCE_LEN,
            nonce_bytes.len()
        )));
    }

    let ciphertext = general_purpose::STANDARD
        .decode(wrapper.ciphertext.trim())
        .map_err(|err| AppError::Encryption(format!("invalid ciphertext encoding: {err}")))?;

    let cipher = Aes256Gcm::new_from_slice(key_bytes)
        .map_err(|_| AppError::Encryption("invalid AES-GCM key length".into()))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|err| AppError::Encryption(format!("failed to decrypt template store: {err}")))?;

    serde_json::from_slice(&plaintext).map_err(|err| AppError::InvalidTemplate {
        path: path.to_path_buf(),
        message: format!("invalid decrypted template contents: {err}"),
    })
}

#[derive(Serialize, Deserialize)]
struct EncryptedTemplateStore {
    version: u32,
    algorithm: String,
    nonce: String,
    ciphertext: String,
}
