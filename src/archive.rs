use flate2::read::GzDecoder;
use log::debug;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not read archive {0}")]
    Unreadable(String),

    #[error("{0} is not a valid gzip archive")]
    NotGzip(String),

    #[error("{0} is not a valid tar")]
    NotTar(String),

    #[error("{archive} does not contain a valid file {member}")]
    UnreadableMember { archive: String, member: String },

    #[error("{archive} does not contain file {member}")]
    MemberNotFound { archive: String, member: String },
}

/// Read a single file out of a gzip-compressed tarball.
///
/// `member` matches an entry named exactly `member` or `./member`.
pub fn read_member(archive_path: &Path, member: &str) -> Result<Vec<u8>, Error> {
    let archive = archive_path.display().to_string();

    let mut file = File::open(archive_path).map_err(|_| Error::Unreadable(archive.clone()))?;
    let mut magic = [0u8; 2];
    match file.read_exact(&mut magic) {
        Ok(()) if magic == GZIP_MAGIC => {}
        Ok(()) => return Err(Error::NotGzip(archive)),
        Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Err(Error::NotGzip(archive)),
        Err(_) => return Err(Error::Unreadable(archive)),
    }
    file.seek(SeekFrom::Start(0))
        .map_err(|_| Error::Unreadable(archive.clone()))?;

    let mut tarball = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = tarball
        .entries()
        .map_err(|_| Error::NotTar(archive.clone()))?;
    let dotted = format!("./{member}");

    for entry in entries {
        let mut entry = entry.map_err(|_| Error::NotTar(archive.clone()))?;
        let matches = {
            let name = entry.path_bytes();
            name.as_ref() == member.as_bytes() || name.as_ref() == dotted.as_bytes()
        };
        if !matches {
            continue;
        }

        debug!("found {member} in {archive}");
        let mut contents = vec![];
        entry
            .read_to_end(&mut contents)
            .map_err(|_| Error::UnreadableMember {
                archive: archive.clone(),
                member: member.to_string(),
            })?;
        return Ok(contents);
    }

    Err(Error::MemberNotFound {
        archive,
        member: member.to_string(),
    })
}
