use super::*;
use wasi_host::pipe::WritePipe;

#[test_log::test]
fn renumber_over_stdout() -> Result<()> {
    let stdout = WritePipe::new_in_memory();
    let (mut ctx, workspace) = ctx_with("renumber_over_stdout", |builder| {
        builder.stdout(Box::new(stdout.clone()));
    })?;

    let fd = open(
        &mut ctx,
        "captured",
        OFlags::CREATE,
        Rights::FD_READ | Rights::FD_WRITE,
    )?;
    write_all(&mut ctx, fd, b"before\n")?;
    ctx.fd_renumber(fd, 1)?;

    for line in [&b"one\n"[..], &b"two\n"[..]] {
        write_all(&mut ctx, 1, line)?;
    }
    assert_eq!(
        errno(ctx.fd_write(fd, &[IoSlice::new(b"gone")])),
        Errno::BadFileDescriptor
    );
    assert_eq!(errno(ctx.fd_close(fd)), Errno::BadFileDescriptor);
    assert!(stdout.contents().is_empty());
    assert_eq!(
        std::fs::read(workspace.path().join("captured"))?,
        b"before\none\ntwo\n"
    );

    // The freed id is the next one handed out.
    assert_eq!(open(&mut ctx, "captured", OFlags::empty(), Rights::FD_READ)?, fd);
    Ok(())
}

#[test_log::test]
fn renumber_failures() -> Result<()> {
    let (mut ctx, _workspace) = ctx("renumber_failures")?;
    let fd = open(&mut ctx, "f", OFlags::CREATE, Rights::FD_WRITE)?;
    assert_eq!(errno(ctx.fd_renumber(fd + 1, fd)), Errno::BadFileDescriptor);
    assert_eq!(
        errno(ctx.fd_renumber(fd, wasi_host::MAX_DESCRIPTORS)),
        Errno::BadFileDescriptor
    );
    ctx.fd_renumber(fd, fd)?;
    assert_eq!(ctx.table().keys().collect::<Vec<_>>(), vec![0, 1, 2, 3, fd]);

    // Renumbering onto an id nobody holds just moves the descriptor.
    ctx.fd_renumber(fd, 100)?;
    write_all(&mut ctx, 100, b"moved")?;
    assert_eq!(ctx.table().keys().collect::<Vec<_>>(), vec![0, 1, 2, 3, 100]);
    Ok(())
}

#[test_log::test]
fn closing_preopen_keeps_nested_dirs() -> Result<()> {
    let (mut ctx, workspace) = ctx("closing_preopen_keeps_nested_dirs")?;
    ctx.path_create_directory(PREOPEN, "d")?;
    let dir = open(&mut ctx, "d", OFlags::DIRECTORY, Rights::empty())?;
    ctx.fd_close(PREOPEN)?;
    assert_eq!(
        errno(ctx.path_create_directory(PREOPEN, "e")),
        Errno::BadFileDescriptor
    );

    let fd = ctx.path_open(
        dir,
        Lookupflags::empty(),
        "../sibling",
        OFlags::CREATE,
        Rights::FD_WRITE,
        Rights::empty(),
        FdFlags::empty(),
    )?;
    write_all(&mut ctx, fd, b"still reachable")?;
    assert!(workspace.path().join("sibling").is_file());
    Ok(())
}

/// Accepts every write and fails every flush.
struct StuckWriter;

impl std::io::Write for StuckWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::WouldBlock,
            "sink is not draining",
        ))
    }
}

#[test_log::test]
fn failed_flush_leaves_table_untouched() -> Result<()> {
    let (mut ctx, _workspace) = ctx_with("failed_flush_leaves_table_untouched", |builder| {
        builder.stdout(Box::new(WritePipe::new(StuckWriter)));
    })?;
    let fd = open(&mut ctx, "f", OFlags::CREATE, Rights::FD_WRITE)?;
    let before = ctx.table().keys().collect::<Vec<_>>();
    assert_eq!(before, vec![0, 1, 2, 3, fd]);

    assert_eq!(errno(ctx.fd_close(1)), Errno::Again);
    assert_eq!(ctx.table().keys().collect::<Vec<_>>(), before);
    write_all(&mut ctx, 1, b"still open")?;

    assert_eq!(errno(ctx.fd_renumber(fd, 1)), Errno::Again);
    assert_eq!(ctx.table().keys().collect::<Vec<_>>(), before);
    write_all(&mut ctx, fd, b"not moved")?;
    Ok(())
}
