use super::*;
use wasi_host::file::FileType;
use wasi_host::preview1::types::{Dirent, Prestat, Whence};

#[test_log::test]
fn append_twice() -> Result<()> {
    let (mut ctx, _workspace) = ctx("append_twice")?;
    let payload = b"hello, append";
    for chunk in [&payload[..], &b"\n"[..], &payload[..]] {
        let fd = ctx.path_open(
            PREOPEN,
            Lookupflags::empty(),
            "log",
            OFlags::CREATE,
            Rights::FD_WRITE,
            Rights::empty(),
            FdFlags::APPEND,
        )?;
        assert!(ctx.fd_fdstat_get(fd)?.fs_flags.contains(FdFlags::APPEND));
        write_all(&mut ctx, fd, chunk)?;
        ctx.fd_close(fd)?;
    }

    let fd = open(&mut ctx, "log", OFlags::empty(), Rights::FD_READ)?;
    assert_eq!(read_to_end(&mut ctx, fd)?, b"hello, append\nhello, append");
    Ok(())
}

#[test_log::test]
fn set_size_is_exact() -> Result<()> {
    let (mut ctx, _workspace) = ctx("set_size_is_exact")?;
    let fd = open(
        &mut ctx,
        "sized",
        OFlags::CREATE,
        Rights::FD_READ | Rights::FD_WRITE,
    )?;
    ctx.fd_filestat_set_size(fd, 4201)?;
    assert_eq!(ctx.fd_filestat_get(fd)?.size, 4201);

    write_all(&mut ctx, fd, &[7; 10_000])?;
    assert_eq!(ctx.fd_filestat_get(fd)?.size, 10_000);
    ctx.fd_filestat_set_size(fd, 4201)?;
    assert_eq!(ctx.fd_filestat_get(fd)?.size, 4201);

    let ro = open(&mut ctx, "sized", OFlags::empty(), Rights::FD_READ)?;
    assert_eq!(
        errno(ctx.fd_filestat_set_size(ro, 1)),
        Errno::BadFileDescriptor
    );
    Ok(())
}

#[test_log::test]
fn read_only_descriptor_rejects_writes() -> Result<()> {
    let (mut ctx, _workspace) = ctx("read_only_descriptor")?;
    let fd = open(&mut ctx, "f", OFlags::CREATE, Rights::FD_READ)?;
    assert_eq!(
        errno(ctx.fd_write(fd, &[IoSlice::new(b"nope")])),
        Errno::BadFileDescriptor
    );
    assert_eq!(ctx.fd_fdstat_get(fd)?.fs_rights_base, Rights::FD_READ);
    Ok(())
}

#[test_log::test]
fn seek_and_tell() -> Result<()> {
    let (mut ctx, _workspace) = ctx("seek_and_tell")?;
    let fd = open(
        &mut ctx,
        "f",
        OFlags::CREATE,
        Rights::FD_READ | Rights::FD_WRITE,
    )?;
    write_all(&mut ctx, fd, b"0123456789")?;
    assert_eq!(ctx.fd_tell(fd)?, 10);
    assert_eq!(ctx.fd_seek(fd, -4, Whence::End)?, 6);
    assert_eq!(read_to_end(&mut ctx, fd)?, b"6789");
    assert_eq!(errno(ctx.fd_seek(fd, -1, Whence::Set)), Errno::InvalidArgument);

    assert_eq!(errno(ctx.fd_seek(1, 0, Whence::Cur)), Errno::SeekPipe);
    assert_eq!(errno(ctx.fd_tell(0)), Errno::SeekPipe);
    let mut buf = [0u8; 4];
    assert_eq!(
        errno(ctx.fd_pread(0, &mut [IoSliceMut::new(&mut buf)], 0)),
        Errno::SeekPipe
    );
    Ok(())
}

#[test_log::test]
fn directories() -> Result<()> {
    let (mut ctx, workspace) = ctx("directories")?;
    ctx.path_create_directory(PREOPEN, "d")?;
    assert!(workspace.path().join("d").is_dir());
    assert_eq!(errno(ctx.path_create_directory(PREOPEN, "d")), Errno::Exists);

    let dir = ctx.path_open(
        PREOPEN,
        Lookupflags::empty(),
        "d",
        OFlags::DIRECTORY,
        Rights::empty(),
        Rights::empty(),
        FdFlags::empty(),
    )?;
    assert_eq!(ctx.fd_fdstat_get(dir)?.fs_filetype, FileType::Directory);
    assert_eq!(
        errno(ctx.fd_write(dir, &[IoSlice::new(b"x")])),
        Errno::BadFileDescriptor
    );

    // Paths resolve relative to the nested descriptor.
    let inner = ctx.path_open(
        dir,
        Lookupflags::empty(),
        "inner",
        OFlags::CREATE,
        Rights::FD_WRITE,
        Rights::empty(),
        FdFlags::empty(),
    )?;
    write_all(&mut ctx, inner, b"data")?;
    ctx.fd_close(inner)?;
    assert_eq!(std::fs::read(workspace.path().join("d/inner"))?, b"data");

    let stat = ctx.path_filestat_get(PREOPEN, Lookupflags::SYMLINK_FOLLOW, "d/inner")?;
    assert_eq!(stat.filetype, FileType::RegularFile);
    assert_eq!(stat.size, 4);

    assert_eq!(errno(ctx.path_remove_directory(PREOPEN, "d")), Errno::NotEmpty);
    assert_eq!(errno(ctx.path_unlink_file(PREOPEN, "d/")), Errno::IsDirectory);
    assert_eq!(
        errno(ctx.path_open(
            PREOPEN,
            Lookupflags::empty(),
            "d/inner/",
            OFlags::empty(),
            Rights::FD_READ,
            Rights::empty(),
            FdFlags::empty(),
        )),
        Errno::NotDirectory
    );
    ctx.path_unlink_file(dir, "inner")?;
    ctx.fd_close(dir)?;
    ctx.path_remove_directory(PREOPEN, "d")?;
    assert!(!workspace.path().join("d").exists());

    assert_eq!(
        errno(ctx.path_remove_directory(PREOPEN, ".")),
        Errno::NotCapable
    );
    assert_eq!(
        errno(ctx.path_filestat_get(PREOPEN, Lookupflags::empty(), "missing")),
        Errno::NoSuchFileOrDirectory
    );
    Ok(())
}

#[test_log::test]
fn directory_oflag_rejects_create() -> Result<()> {
    let (mut ctx, _workspace) = ctx("directory_oflag")?;
    assert_eq!(
        errno(open(
            &mut ctx,
            "d",
            OFlags::DIRECTORY | OFlags::CREATE,
            Rights::empty()
        )),
        Errno::InvalidArgument
    );
    assert_eq!(
        errno(ctx.path_open(
            PREOPEN,
            Lookupflags::empty(),
            "f",
            OFlags::CREATE,
            Rights::FD_WRITE,
            Rights::empty(),
            FdFlags::SYNC,
        )),
        Errno::NotSupported
    );
    // Failed opens must not consume an id.
    assert_eq!(ctx.table().keys().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    Ok(())
}

fn parse_dirents(buf: &[u8]) -> Vec<(Dirent, String)> {
    let mut out = Vec::new();
    let mut rest = buf;
    while rest.len() >= Dirent::SIZE {
        let d_next = u64::from_le_bytes(rest[0..8].try_into().unwrap());
        let d_ino = u64::from_le_bytes(rest[8..16].try_into().unwrap());
        let d_namlen = u32::from_le_bytes(rest[16..20].try_into().unwrap());
        let d_type = match rest[20] {
            3 => FileType::Directory,
            4 => FileType::RegularFile,
            _ => FileType::Unknown,
        };
        let name_end = Dirent::SIZE + d_namlen as usize;
        if rest.len() < name_end {
            break;
        }
        let name = String::from_utf8(rest[Dirent::SIZE..name_end].to_vec()).unwrap();
        out.push((
            Dirent {
                d_next,
                d_ino,
                d_namlen,
                d_type,
            },
            name,
        ));
        rest = &rest[name_end..];
    }
    out
}

// Readdir does not work on windows, so we won't test it there.
#[cfg(not(windows))]
#[test_log::test]
fn readdir() -> Result<()> {
    let (mut ctx, _workspace) = ctx("readdir")?;
    ctx.path_create_directory(PREOPEN, "dir")?;
    let fd = open(&mut ctx, "file", OFlags::CREATE, Rights::FD_WRITE)?;
    ctx.fd_close(fd)?;

    let mut buf = vec![0u8; 4096];
    let used = ctx.fd_readdir(PREOPEN, &mut buf, 0)? as usize;
    assert!(used < buf.len());
    let entries = parse_dirents(&buf[..used]);
    let names: Vec<&str> = entries.iter().map(|(_, n)| n.as_str()).collect();
    assert_eq!(&names[..2], &[".", ".."]);
    assert_eq!(entries.len(), 4);
    for (ix, (dirent, _)) in entries.iter().enumerate() {
        assert_eq!(dirent.d_next, ix as u64 + 1);
    }
    let file = entries.iter().find(|(_, n)| n == "file").unwrap();
    assert_eq!(file.0.d_type, FileType::RegularFile);
    let dir = entries.iter().find(|(_, n)| n == "dir").unwrap();
    assert_eq!(dir.0.d_type, FileType::Directory);

    // A buffer too small for everything comes back completely full.
    let mut small = vec![0u8; Dirent::SIZE + 3];
    assert_eq!(
        ctx.fd_readdir(PREOPEN, &mut small, 0)? as usize,
        small.len()
    );

    // Resuming at a cookie skips what was already seen.
    let used = ctx.fd_readdir(PREOPEN, &mut buf, 2)? as usize;
    let rest = parse_dirents(&buf[..used]);
    assert_eq!(rest.len(), 2);
    assert!(rest.iter().all(|(_, n)| n != "." && n != ".."));

    assert_eq!(
        errno(ctx.fd_readdir(1, &mut buf, 0)),
        Errno::NotDirectory
    );
    Ok(())
}

#[test_log::test]
fn prestat() -> Result<()> {
    let (mut ctx, _workspace) = ctx_with("prestat", |builder| {
        builder.env("HOME", "/sandbox").unwrap();
    })?;
    assert_eq!(ctx.fd_prestat_get(PREOPEN)?, Prestat::Dir { pr_name_len: 1 });
    let mut name = [0u8; 1];
    ctx.fd_prestat_dir_name(PREOPEN, &mut name)?;
    assert_eq!(&name, b".");
    assert_eq!(
        errno(ctx.fd_prestat_dir_name(PREOPEN, &mut [])),
        Errno::NameTooLong
    );

    assert_eq!(errno(ctx.fd_prestat_get(0)), Errno::BadFileDescriptor);
    assert_eq!(errno(ctx.fd_prestat_get(PREOPEN + 1)), Errno::BadFileDescriptor);
    let nested = open(&mut ctx, ".", OFlags::DIRECTORY, Rights::empty())?;
    assert_eq!(errno(ctx.fd_prestat_get(nested)), Errno::BadFileDescriptor);

    let (count, size) = ctx.environ_sizes_get()?;
    assert_eq!((count, size), (1, "HOME=/sandbox\0".len() as u32));
    let mut environ = vec![0u8; size as usize];
    assert_eq!(ctx.environ_get(&mut environ)?, vec![0]);
    assert_eq!(environ, b"HOME=/sandbox\0");
    Ok(())
}

#[test_log::test]
fn stdio_descriptors() -> Result<()> {
    use wasi_host::pipe::{ReadPipe, WritePipe};

    let stdout = WritePipe::new_in_memory();
    let (mut ctx, _workspace) = ctx_with("stdio_descriptors", |builder| {
        builder
            .stdin(Box::new(ReadPipe::from("from stdin")))
            .stdout(Box::new(stdout.clone()));
    })?;

    assert_eq!(read_to_end(&mut ctx, 0)?, b"from stdin");
    write_all(&mut ctx, 1, b"to stdout")?;
    assert_eq!(stdout.contents(), b"to stdout");

    assert_eq!(ctx.fd_fdstat_get(1)?.fs_rights_base, Rights::FD_WRITE);
    assert_eq!(ctx.fd_filestat_get(2)?.size, 0);
    assert_eq!(
        errno(ctx.fd_pwrite(1, &[IoSlice::new(b"x")], 0)),
        Errno::SeekPipe
    );
    assert_eq!(
        errno(ctx.fd_filestat_set_size(1, 0)),
        Errno::BadFileDescriptor
    );
    assert_eq!(errno(ctx.fd_write(0, &[IoSlice::new(b"x")])), Errno::BadFileDescriptor);
    Ok(())
}

#[cfg(target_os = "linux")]
#[test_log::test]
fn nonblocking_fifo() -> Result<()> {
    use rustix::fs::{CWD, Mode, mkfifoat};

    let (mut ctx, workspace) = ctx("nonblocking_fifo")?;
    let host_path = workspace.path().join("fifo");
    mkfifoat(CWD, host_path.as_path(), Mode::RUSR | Mode::WUSR)?;

    // With no writer yet, the open itself must not wait for one.
    let fd = ctx.path_open(
        PREOPEN,
        Lookupflags::empty(),
        "fifo",
        OFlags::empty(),
        Rights::FD_READ,
        Rights::empty(),
        FdFlags::NONBLOCK,
    )?;
    assert!(ctx.fd_fdstat_get(fd)?.fs_flags.contains(FdFlags::NONBLOCK));

    let mut writer = std::fs::OpenOptions::new().write(true).open(&host_path)?;
    let mut buf = [0u8; 8];
    assert_eq!(
        errno(ctx.fd_read(fd, &mut [IoSliceMut::new(&mut buf)])),
        Errno::Again
    );

    std::io::Write::write_all(&mut writer, b"x")?;
    assert_eq!(ctx.fd_read(fd, &mut [IoSliceMut::new(&mut buf)])?, 1);
    assert_eq!(&buf[..1], b"x");
    Ok(())
}
