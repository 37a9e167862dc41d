use super::*;
use wasi_host::{I32Exit, exit_status};

#[test_log::test]
fn proc_exit_carries_status() -> Result<()> {
    let (mut ctx, _workspace) = ctx("proc_exit_carries_status")?;
    let exit = ctx.proc_exit(2);
    assert_eq!(exit, I32Exit(2));

    // Embedders unwind with the exit as the instance's error.
    let run: Result<()> = Err(anyhow::Error::new(exit).context("running _start"));
    assert_eq!(exit_status(&run), 2);
    assert_eq!(exit_status(&Ok(())), 0);
    Ok(())
}

#[test_log::test]
fn proc_exit_keeps_bits() -> Result<()> {
    let (mut ctx, _workspace) = ctx("proc_exit_keeps_bits")?;
    assert_eq!(ctx.proc_exit(u32::MAX), I32Exit(-1));
    assert_eq!(ctx.proc_exit(0).process_exit_code(), 0);
    Ok(())
}

#[test]
fn trap_reports_abort() {
    let trap = Error::trap(anyhow::anyhow!("wasm trap: unreachable"));
    assert!(trap.is_trap());
    let run: Result<()> = Err(trap.into_anyhow());
    let status = exit_status(&run);
    if cfg!(windows) {
        assert_eq!(status, 3);
    } else {
        assert_eq!(status, 128 + 6);
    }
}
