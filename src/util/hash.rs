use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use md5::{Digest, Md5};

use crate::model::error::{SensiError, SensiResult};
use crate::model::result::InputFile;

pub fn file_md5(path: &Path) -> SensiResult<String> {
    let file = File::open(path).map_err(SensiError::IoError)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Md5::new();
    let mut buffer = [0; 8192];

    loop {
        let count = reader.read(&mut buffer).map_err(SensiError::IoError)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Record an input file alongside its checksum for the report.
pub fn describe_input(path: &Path) -> SensiResult<InputFile> {
    Ok(InputFile { path: path.display().to_string(), md5: file_md5(path)? })
}

#[test]
fn test_file_md5() {
    use std::io::Write;
    use tempfile::tempdir;

    let dir = tempdir().expect("Failed to create temp dir");
    let file_path = dir.path().join("test.txt");
    let mut file = File::create(&file_path).expect("Unable to create file");
    writeln!(file, "ae9fja0921").expect("Unable to write to file");

    assert_eq!(file_md5(&file_path).unwrap(), "dfb19f01c983e75abbc842eeef38697e");
    let input = describe_input(&file_path).unwrap();
    assert!(input.path.ends_with("test.txt"));
    assert_eq!(input.md5, "dfb19f01c983e75abbc842eeef38697e");

    dir.close().expect("Failed to clean up temp dir");
}
