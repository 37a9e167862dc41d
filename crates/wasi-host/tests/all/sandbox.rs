use super::*;

#[test_log::test]
fn dotdot_above_root() -> Result<()> {
    let (mut ctx, _workspace) = ctx("dotdot_above_root")?;
    for path in ["..", "../x", "a/../../x", "./../x"] {
        assert_eq!(
            errno(open(&mut ctx, path, OFlags::CREATE, Rights::FD_WRITE)),
            Errno::NotCapable,
            "{path}"
        );
        assert_eq!(
            errno(ctx.path_filestat_get(PREOPEN, Lookupflags::empty(), path)),
            Errno::NotCapable,
            "{path}"
        );
    }
    assert_eq!(
        errno(ctx.path_create_directory(PREOPEN, "../escape")),
        Errno::NotCapable
    );
    // Dots that stay inside the root are fine.
    ctx.path_create_directory(PREOPEN, "a")?;
    ctx.path_create_directory(PREOPEN, "a/../b")?;
    assert!(ctx.path_filestat_get(PREOPEN, Lookupflags::empty(), "b").is_ok());
    Ok(())
}

#[test_log::test]
fn nested_descriptor_cannot_climb_out() -> Result<()> {
    let (mut ctx, _workspace) = ctx("nested_descriptor")?;
    ctx.path_create_directory(PREOPEN, "d")?;
    let dir = open(&mut ctx, "d", OFlags::DIRECTORY, Rights::empty())?;
    assert_eq!(
        errno(ctx.path_create_directory(dir, "../../x")),
        Errno::NotCapable
    );
    ctx.path_create_directory(dir, "../x")?;
    Ok(())
}

#[test_log::test]
fn absolute_and_malformed_paths() -> Result<()> {
    let (mut ctx, _workspace) = ctx("absolute_paths")?;
    assert_eq!(
        errno(open(&mut ctx, "/etc/passwd", OFlags::empty(), Rights::FD_READ)),
        Errno::NotCapable
    );
    assert_eq!(
        errno(open(&mut ctx, "", OFlags::empty(), Rights::FD_READ)),
        Errno::NoSuchFileOrDirectory
    );
    assert_eq!(
        errno(open(&mut ctx, "a\0b", OFlags::CREATE, Rights::FD_WRITE)),
        Errno::IllegalByteSequence
    );
    assert_eq!(
        errno(ctx.path_create_directory(1, "x")),
        Errno::NotDirectory
    );
    assert_eq!(
        errno(ctx.path_create_directory(42, "x")),
        Errno::BadFileDescriptor
    );
    Ok(())
}

#[cfg(unix)]
#[test_log::test]
fn escaping_symlinks() -> Result<()> {
    let (mut ctx, workspace) = ctx("escaping_symlinks")?;
    let outside = prepare_workspace("escaping_symlinks_outside")?;
    std::fs::write(outside.path().join("secret"), b"host data")?;
    std::os::unix::fs::symlink(outside.path(), workspace.path().join("abs"))?;
    std::os::unix::fs::symlink("..", workspace.path().join("up"))?;

    for path in ["abs/secret", "up/secret"] {
        assert_eq!(
            errno(ctx.path_open(
                PREOPEN,
                Lookupflags::SYMLINK_FOLLOW,
                path,
                OFlags::empty(),
                Rights::FD_READ,
                Rights::empty(),
                FdFlags::empty(),
            )),
            Errno::NotCapable,
            "{path}"
        );
    }
    assert_eq!(
        errno(ctx.path_filestat_get(PREOPEN, Lookupflags::SYMLINK_FOLLOW, "abs")),
        Errno::NotCapable
    );

    // The link itself can still be inspected.
    let stat = ctx.path_filestat_get(PREOPEN, Lookupflags::empty(), "abs")?;
    assert_eq!(stat.filetype, wasi_host::file::FileType::SymbolicLink);
    Ok(())
}
