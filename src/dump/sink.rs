use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Write half of a dump job: either a buffered plain file or a gzip-framed
/// one. The encoder writes through this without knowing which it got; the
/// `.gz` file name suffix is the caller's business.
pub enum DataSink {
    Plain(BufWriter<File>),
    Compressed(GzEncoder<BufWriter<File>>),
}

impl DataSink {
    pub fn create(path: &Path, compress: bool) -> io::Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        if compress {
            Ok(DataSink::Compressed(GzEncoder::new(
                file,
                Compression::default(),
            )))
        } else {
            Ok(DataSink::Plain(file))
        }
    }

    /// Flush buffered data and close the gzip frame. Dropping an unfinished
    /// compressed sink leaves a truncated file behind.
    pub fn finish(self) -> io::Result<()> {
        match self {
            DataSink::Plain(mut file) => file.flush(),
            DataSink::Compressed(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for DataSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DataSink::Plain(file) => file.write(buf),
            DataSink::Compressed(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            DataSink::Plain(file) => file.flush(),
            DataSink::Compressed(encoder) => encoder.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_plain_sink_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.sql");
        let mut sink = DataSink::create(&path, false).unwrap();
        sink.write_all(b"INSERT INTO `t` VALUES\n (\"1\");\n").unwrap();
        sink.finish().unwrap();
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"INSERT INTO `t` VALUES\n (\"1\");\n".to_vec()
        );
    }

    #[test]
    fn test_compressed_sink_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.sql.gz");
        let payload = b"/*!40101 SET NAMES binary*/;\nINSERT INTO `t` VALUES\n (\"1\",\"a\");\n";

        let mut sink = DataSink::create(&path, true).unwrap();
        sink.write_all(payload).unwrap();
        sink.finish().unwrap();

        let compressed = std::fs::read(&path).unwrap();
        assert_ne!(compressed, payload.to_vec());

        let mut decoder = flate2::read::GzDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, payload.to_vec());
    }
}
