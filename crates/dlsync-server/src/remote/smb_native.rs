//! libsmbclient-backed SMB sessions via `pavao`.

use super::smb::{SmbConnector, SmbCredentials, SmbEntry, SmbEntryKind, SmbShare};
use pavao::{
    SmbClient, SmbCredentials as PavaoCredentials, SmbDirentType, SmbMode, SmbOpenOptions,
    SmbOptions,
};
use std::io::{self, Read, Write};

pub struct PavaoConnector;

impl SmbConnector for PavaoConnector {
    fn connect(&self, credentials: &SmbCredentials, share: &str) -> io::Result<Box<dyn SmbShare>> {
        let server = match credentials.port {
            0 | 445 => format!("smb://{}", credentials.host),
            port => format!("smb://{}:{}", credentials.host, port),
        };
        let client = SmbClient::new(
            PavaoCredentials::default()
                .server(server)
                .share(format!("/{}", share))
                .username(credentials.username.clone())
                .password(credentials.password.clone()),
            SmbOptions::default().one_share_per_server(true),
        )
        .map_err(to_io)?;

        // Fail fast on bad credentials or a missing share
        client.list_dir("/").map_err(to_io)?;

        Ok(Box::new(PavaoShare { client }))
    }
}

struct PavaoShare {
    client: SmbClient,
}

fn to_io(err: pavao::SmbError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

fn share_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

impl SmbShare for PavaoShare {
    fn list(&mut self, dir: &str) -> io::Result<Vec<SmbEntry>> {
        let entries = self.client.list_dir(&share_path(dir)).map_err(to_io)?;
        Ok(entries
            .iter()
            .filter(|e| e.name() != "." && e.name() != "..")
            .filter_map(|e| {
                let kind = match e.get_type() {
                    SmbDirentType::Dir => SmbEntryKind::Directory,
                    SmbDirentType::File => SmbEntryKind::File,
                    _ => return None,
                };
                Some(SmbEntry {
                    name: e.name().to_string(),
                    kind,
                })
            })
            .collect())
    }

    fn folder_exists(&mut self, path: &str) -> io::Result<bool> {
        Ok(self.client.list_dir(&share_path(path)).is_ok())
    }

    fn create_dir(&mut self, path: &str) -> io::Result<()> {
        self.client
            .mkdir(&share_path(path), SmbMode::from(0o755))
            .map_err(to_io)
    }

    fn remove_file(&mut self, path: &str) -> io::Result<()> {
        self.client.unlink(&share_path(path)).map_err(to_io)
    }

    fn remove_dir(&mut self, path: &str) -> io::Result<()> {
        self.client.rmdir(&share_path(path)).map_err(to_io)
    }

    fn open_read<'a>(&'a mut self, path: &str) -> io::Result<Box<dyn Read + 'a>> {
        let file = self
            .client
            .open_with(&share_path(path), SmbOpenOptions::default().read(true))
            .map_err(to_io)?;
        Ok(Box::new(file))
    }

    fn open_write<'a>(&'a mut self, path: &str) -> io::Result<Box<dyn Write + 'a>> {
        let file = self
            .client
            .open_with(
                &share_path(path),
                SmbOpenOptions::default().create(true).write(true).truncate(true),
            )
            .map_err(to_io)?;
        Ok(Box::new(file))
    }
}
