//! The content-addressed file model: splits a backing file into fixed-size
//! pieces, hashes each piece, and hands out random-access per-piece streams.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use swarmfile_core::lengths::ValidPieceIndex;
use swarmfile_core::{Lengths, Metainfo, PieceHash, TopHash};

use crate::chunk_stream::ChunkStream;
use crate::error::Result;

pub struct HashedFile {
    file: Arc<Mutex<File>>,
    lengths: Lengths,
    hashes: Vec<PieceHash>,
    haveset: BTreeSet<u32>,
    top_hash: TopHash,
}

impl HashedFile {
    /// Mode (a): compute hashes from a complete local file; mark every piece present.
    pub fn from_complete_file(path: &Path, piece_size: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let total_length = file.metadata()?.len();
        let lengths = Lengths::new(total_length, piece_size)?;
        let file = Arc::new(Mutex::new(file));

        let mut hashes = Vec::with_capacity(lengths.total_pieces() as usize);
        let mut haveset = BTreeSet::new();
        for index in lengths.iter_piece_infos() {
            let stream = ChunkStream::new(file.clone(), lengths.piece_offset(index), lengths.piece_length(index));
            let data = stream.read_all()?;
            hashes.push(PieceHash::of(&data));
            haveset.insert(index.get());
        }

        let metainfo = Metainfo::new(hashes.clone(), total_length);
        let top_hash = metainfo.top_hash();
        Ok(Self {
            file,
            lengths,
            hashes,
            haveset,
            top_hash,
        })
    }

    /// Mode (b): a metainfo plus an existing (possibly partial) backing file;
    /// verify each piece and initialize `haveset` to the verified indices only.
    pub fn from_metainfo_with_file(metainfo: &Metainfo, path: &Path, piece_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(metainfo.length)?;
        let lengths = Lengths::new(metainfo.length, piece_size)?;
        let file = Arc::new(Mutex::new(file));

        let mut haveset = BTreeSet::new();
        for index in lengths.iter_piece_infos() {
            let stream = ChunkStream::new(file.clone(), lengths.piece_offset(index), lengths.piece_length(index));
            let data = stream.read_all()?;
            if metainfo.hashes[index.get() as usize].verify(&data) {
                haveset.insert(index.get());
            }
        }

        let top_hash = metainfo.top_hash();
        Ok(Self {
            file,
            lengths,
            hashes: metainfo.hashes.clone(),
            haveset,
            top_hash,
        })
    }

    /// Mode (c): a metainfo with no prior file; allocate an empty backing file.
    pub fn from_metainfo_new(metainfo: &Metainfo, path: &Path, piece_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(metainfo.length)?;
        let lengths = Lengths::new(metainfo.length, piece_size)?;
        let top_hash = metainfo.top_hash();
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            lengths,
            hashes: metainfo.hashes.clone(),
            haveset: BTreeSet::new(),
            top_hash,
        })
    }

    pub fn lengths(&self) -> &Lengths {
        &self.lengths
    }

    pub fn hashes(&self) -> &[PieceHash] {
        &self.hashes
    }

    pub fn haveset(&self) -> &BTreeSet<u32> {
        &self.haveset
    }

    pub fn top_hash(&self) -> &TopHash {
        &self.top_hash
    }

    pub fn metainfo(&self) -> Metainfo {
        Metainfo::new(self.hashes.clone(), self.lengths.total_length())
    }

    pub fn piece_count(&self) -> u32 {
        self.lengths.total_pieces()
    }

    pub fn piece_hash(&self, piece_no: u32) -> &PieceHash {
        &self.hashes[piece_no as usize]
    }

    pub fn piece_length(&self, piece_no: u32) -> Option<u32> {
        let index = self.lengths.validate_piece_index(piece_no)?;
        Some(self.lengths.piece_length(index))
    }

    pub fn get_chunk_stream(&self, piece_no: u32) -> Option<ChunkStream> {
        let index = self.lengths.validate_piece_index(piece_no)?;
        Some(ChunkStream::new(
            self.file.clone(),
            self.lengths.piece_offset(index),
            self.lengths.piece_length(index),
        ))
    }

    pub fn hash_chunk(&self, index: ValidPieceIndex) -> Result<PieceHash> {
        let stream = ChunkStream::new(
            self.file.clone(),
            self.lengths.piece_offset(index),
            self.lengths.piece_length(index),
        );
        Ok(PieceHash::of(&stream.read_all()?))
    }

    pub fn mark_have(&mut self, piece_no: u32) {
        self.haveset.insert(piece_no);
    }

    pub fn is_complete(&self) -> bool {
        self.haveset.len() as u32 == self.piece_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_file(path: &Path, data: &[u8]) {
        let mut f = File::create(path).unwrap();
        f.write_all(data).unwrap();
    }

    #[test]
    fn test_from_complete_file_marks_every_piece_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.bin");
        write_file(&path, &vec![7u8; 42]);

        let hf = HashedFile::from_complete_file(&path, 16).unwrap();
        assert_eq!(hf.piece_count(), 3);
        assert_eq!(hf.haveset().len(), 3);
        assert!(hf.is_complete());
    }

    #[test]
    fn test_from_metainfo_with_partial_file_verifies_each_piece() {
        let dir = tempfile::tempdir().unwrap();
        let seed_path = dir.path().join("seed.bin");
        write_file(&seed_path, &vec![9u8; 40]);
        let seed = HashedFile::from_complete_file(&seed_path, 16).unwrap();
        let metainfo = seed.metainfo();

        // leecher's partial file has piece 0 correct, piece 1 corrupted, piece 2 missing.
        let leech_path = dir.path().join("leech.bin");
        let mut data = vec![9u8; 40];
        data[16] = 0xff;
        write_file(&leech_path, &data);

        let hf = HashedFile::from_metainfo_with_file(&metainfo, &leech_path, 16).unwrap();
        assert!(hf.haveset().contains(&0));
        assert!(!hf.haveset().contains(&1));
        assert_eq!(hf.top_hash(), seed.top_hash());
    }

    #[test]
    fn test_from_metainfo_new_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let seed_path = dir.path().join("seed.bin");
        write_file(&seed_path, &vec![3u8; 20]);
        let seed = HashedFile::from_complete_file(&seed_path, 16).unwrap();
        let metainfo = seed.metainfo();

        let dl_path = dir.path().join("download.part");
        let hf = HashedFile::from_metainfo_new(&metainfo, &dl_path, 16).unwrap();
        assert!(hf.haveset().is_empty());
        assert!(!hf.is_complete());
        assert_eq!(dl_path.metadata().unwrap().len(), 20);
    }

    #[test]
    fn test_chunk_stream_write_and_reverify() {
        let dir = tempfile::tempdir().unwrap();
        let seed_path = dir.path().join("seed.bin");
        write_file(&seed_path, b"abcdefghij");
        let seed = HashedFile::from_complete_file(&seed_path, 5).unwrap();
        let metainfo = seed.metainfo();

        let dl_path = dir.path().join("download.part");
        let mut hf = HashedFile::from_metainfo_new(&metainfo, &dl_path, 5).unwrap();
        let mut stream = hf.get_chunk_stream(0).unwrap();
        stream.write(b"abcde").unwrap();
        assert!(hf.piece_hash(0).verify(b"abcde"));
        hf.mark_have(0);
        assert!(hf.haveset().contains(&0));
    }
}
