//! Shared helpers for supervisor integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::TempDir;
use warden_core::http::{Response, Transport, TransportError};
use warden_core::release::{HashAlgorithm, SignaturePadding, Signer};
use warden_core::{AccessToken, Config};

pub const SIGNING_KEY: &str = include_str!("../../../warden-core/tests/fixtures/signing_key.pem");
pub const PUBLIC_KEY: &str = include_str!("../../../warden-core/tests/fixtures/public_key.pem");

const API: &str = "https://api.test";

pub fn echo() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_warden-echo"))
}

/// Release feed answering from a fixed route table; unknown URLs are 404.
#[derive(Default)]
pub struct FakeFeed {
    routes: Mutex<HashMap<String, Response>>,
    hits: Mutex<Vec<String>>,
}

impl FakeFeed {
    pub fn route(&self, url: &str, response: Response) {
        self.routes.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl Transport for FakeFeed {
    fn get(&self, url: &str, _accept: &str) -> Result<Response, TransportError> {
        self.hits.lock().unwrap().push(url.to_string());
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "Not Found")))
    }

    fn post_form(&self, url: &str, _form: &[(&str, &str)]) -> Result<Response, TransportError> {
        self.get(url, "application/json")
    }

    fn authorize(&self, _token: &AccessToken) {}
}

/// A scratch installation with the demo module copied in as `program`.
pub struct Installation {
    pub temp: TempDir,
    pub config: Config,
    pub feed: Arc<FakeFeed>,
}

impl Installation {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let install_dir = temp.path().join("install");
        fs::create_dir_all(&install_dir).unwrap();
        let module_path = install_dir.join("program");
        fs::copy(echo(), &module_path).unwrap();

        let public_key_path = temp.path().join("public.pem");
        fs::write(&public_key_path, PUBLIC_KEY).unwrap();

        let config = Config {
            module_path,
            repo_id: "acme/bot".to_string(),
            public_key_path,
            install_dir,
            staging_dir: temp.path().join("updates"),
            api_base: API.to_string(),
            ..Config::default()
        };

        Self {
            temp,
            config,
            feed: Arc::new(FakeFeed::default()),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    pub fn release_url(&self) -> String {
        self.config.latest_release_url()
    }

    /// Publish a signed release of the demo module with a `data.txt` marker.
    pub fn publish(&self, version: &str) {
        let payload = zip_bytes(&[
            ("program", fs::read(echo()).unwrap()),
            ("data.txt", version.as_bytes().to_vec()),
        ]);
        let signer =
            Signer::from_pem(SIGNING_KEY, HashAlgorithm::Sha512, SignaturePadding::Pkcs1).unwrap();
        let signature = signer.sign(&payload).unwrap();

        let asset = |name: &str| json!({ "name": name, "url": format!("{API}/assets/{name}") });
        let release = json!({
            "tag_name": format!("v{version}"),
            "assets": [asset("binaries.zip"), asset("signature.bin"), asset("version.txt")],
        });
        self.feed
            .route(&self.release_url(), Response::new(200, release.to_string()));
        self.feed
            .route(&format!("{API}/assets/version.txt"), Response::new(200, version));
        self.feed
            .route(&format!("{API}/assets/signature.bin"), Response::new(200, signature));
        self.feed
            .route(&format!("{API}/assets/binaries.zip"), Response::new(200, payload));
    }

    pub fn installed(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.config.install_dir.join(name)).ok()
    }
}

pub fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o755);
        writer.start_file(*name, options).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn read_record(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Poll `path` until `pred` holds for its lines or ten seconds pass.
pub fn wait_for_record(path: &Path, pred: impl Fn(&[String]) -> bool) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let record = read_record(path);
        if pred(&record) || Instant::now() > deadline {
            return record;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

pub fn count(record: &[String], line: &str) -> usize {
    record.iter().filter(|l| *l == line).count()
}
