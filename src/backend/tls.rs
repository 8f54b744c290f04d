//! TLS material for transports that support it.
//!
//! The options mirror the knobs of the external drivers: a CA bundle for
//! peer verification, a certificate/key pair, and a password file whose
//! first line unlocks the key.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// TLS configuration for a backend connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsOptions {
    /// CA bundle used to verify peers.
    #[serde(default)]
    pub verify_path: Option<String>,

    /// Certificate chain path.
    #[serde(default)]
    pub cert_path: Option<String>,

    /// Private key path.
    #[serde(default)]
    pub key_path: Option<String>,

    /// File whose first line is the private key password.
    #[serde(default)]
    pub password_file: Option<String>,
}

impl TlsOptions {
    /// Validate option consistency.
    ///
    /// A certificate requires a key and vice versa; file existence is
    /// checked outside test builds.
    pub fn validate(&self) -> Result<()> {
        match (&self.cert_path, &self.key_path) {
            (Some(_), None) => anyhow::bail!("tls.key_path required when tls.cert_path is set"),
            (None, Some(_)) => anyhow::bail!("tls.cert_path required when tls.key_path is set"),
            _ => {}
        }

        #[cfg(not(test))]
        for (name, path) in [
            ("tls.verify_path", &self.verify_path),
            ("tls.cert_path", &self.cert_path),
            ("tls.key_path", &self.key_path),
            ("tls.password_file", &self.password_file),
        ] {
            if let Some(path) = path {
                if !Path::new(path).exists() {
                    anyhow::bail!("{} does not exist: {}", name, path);
                }
            }
        }

        Ok(())
    }

    /// Load the certificate chain.
    pub fn load_cert(&self) -> Result<Option<Vec<u8>>> {
        self.cert_path
            .as_deref()
            .map(|path| {
                std::fs::read(path).with_context(|| format!("failed to read cert chain: {path}"))
            })
            .transpose()
    }

    /// Load the private key.
    pub fn load_key(&self) -> Result<Option<Vec<u8>>> {
        self.key_path
            .as_deref()
            .map(|path| {
                std::fs::read(path).with_context(|| format!("failed to read private key: {path}"))
            })
            .transpose()
    }

    /// Read the key password: the first line of the password file.
    pub fn read_password(&self) -> Result<Option<String>> {
        let Some(ref path) = self.password_file else {
            return Ok(None);
        };
        let file = std::fs::File::open(Path::new(path))
            .with_context(|| format!("failed to open password file: {path}"))?;
        let mut line = String::new();
        BufReader::new(file)
            .read_line(&mut line)
            .with_context(|| format!("failed to read password file: {path}"))?;
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn cert_without_key_rejected() {
        let opts = TlsOptions {
            verify_path: None,
            cert_path: Some("cert.pem".into()),
            key_path: None,
            password_file: None,
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn password_is_first_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "s3cret").unwrap();
        writeln!(file, "ignored").unwrap();

        let opts = TlsOptions {
            verify_path: None,
            cert_path: None,
            key_path: None,
            password_file: Some(file.path().to_string_lossy().into_owned()),
        };
        assert_eq!(opts.read_password().unwrap().unwrap(), "s3cret");
    }

    #[test]
    fn no_password_file_is_none() {
        let opts = TlsOptions {
            verify_path: None,
            cert_path: None,
            key_path: None,
            password_file: None,
        };
        assert!(opts.read_password().unwrap().is_none());
    }
}
