use std::fmt;

use super::{AtPath, FileSystem, FsError};
use crate::client::Client;
use crate::transfer::EntryMeta;

/// [`FileSystem`] backed by a DVC repository.
///
/// Writes and removals are published immediately: each one is its own
/// DVC push, commit and git push.
pub struct DvcFs {
    client: Client,
}

impl DvcFs {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Filesystem over `repo` with default settings.
    pub fn open(repo: &str) -> Self {
        Self::new(Client::new(repo))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Direct access for batch operations such as
    /// [`Client::update`].
    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn into_client(self) -> Client {
        self.client
    }
}

impl From<Client> for DvcFs {
    fn from(client: Client) -> Self {
        Self::new(client)
    }
}

impl fmt::Display for DvcFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = self
            .client
            .checkout_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        write!(f, "<dvcfs '{}' -> '{}'>", self.client.repo_url(), dir)
    }
}

impl fmt::Debug for DvcFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FileSystem for DvcFs {
    fn read_bytes(&mut self, path: &str) -> std::result::Result<Vec<u8>, FsError> {
        self.client.read(path).at(path)
    }

    fn write_bytes(&mut self, path: &str, data: &[u8]) -> std::result::Result<(), FsError> {
        self.client.write(path, data).map(|_| ()).at(path)
    }

    fn scan_dir(&mut self, path: &str) -> std::result::Result<Vec<EntryMeta>, FsError> {
        self.client.scan_dir(path).at(path)
    }

    fn walk_files(&mut self, path: &str) -> std::result::Result<Vec<String>, FsError> {
        self.client.walk_files(path).at(path)
    }

    fn exists(&mut self, path: &str) -> std::result::Result<bool, FsError> {
        self.client.exists(path).at(path)
    }

    fn is_dir(&mut self, path: &str) -> std::result::Result<bool, FsError> {
        self.client.is_dir(path).at(path)
    }

    fn is_file(&mut self, path: &str) -> std::result::Result<bool, FsError> {
        self.client.is_file(path).at(path)
    }

    fn remove(&mut self, path: &str) -> std::result::Result<(), FsError> {
        self.client.remove(&[path]).map(|_| ()).at(path)
    }

    fn close(&mut self) -> std::result::Result<(), FsError> {
        self.client.close().at("/")
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}
