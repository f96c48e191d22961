use super::*;

use std::{fs, io};

use crate::{err_at, read_file, write_file, Error, Result};

#[test]
fn test_cbor_bytes() {
    let data = into_cbor_bytes(0xdeadbeef_u64).unwrap();
    let (val, n) = from_cbor_bytes::<u64>(&data).unwrap();
    assert_eq!(n, data.len());
    assert_eq!(val, 0xdeadbeef);

    let data = into_cbor_bytes("hello".to_string()).unwrap();
    let (val, _) = from_cbor_bytes::<String>(&data).unwrap();
    assert_eq!(val, "hello".to_string());

    let res: Result<(u64, usize)> = from_cbor_bytes::<u64>(&[]);
    assert!(matches!(res.unwrap_err(), Error::FailCbor(_, _)));
}

#[test]
fn test_file_macros() {
    let path = {
        let mut path = std::env::temp_dir();
        path.push("treapkv-util-file-macros.data");
        path
    };
    fs::remove_file(&path).ok();

    let run = |path: &std::path::Path| -> Result<Vec<u8>> {
        use std::io::{Read, Seek};

        let mut opts = fs::OpenOptions::new();
        let mut fd =
            err_at!(IOError, opts.create(true).read(true).write(true).open(path))?;

        write_file!(fd, b"hello world", path, "writing")?;
        let buf = read_file!(fd, io::SeekFrom::Start(6), 5_u64, "reading")?;

        // a short read fails hard rather than returning partial data.
        let res: Result<Vec<u8>> =
            read_file!(fd, io::SeekFrom::Start(6), 50_u64, "reading");
        assert!(matches!(res.unwrap_err(), Error::Fatal(_, _)));

        Ok(buf)
    };

    let buf = run(&path).unwrap();
    assert_eq!(&buf, b"world");

    fs::remove_file(&path).ok();
}
