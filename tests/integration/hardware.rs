//! Hardware entry point: simulation, in-process and isolated device runs

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cosim::{invoke_hw, DeviceError, EmulatedRuntime, InvokeError, KernelArgs, Mmap, ScalarValue, Seq};

fn scale_kernel(args: &mut KernelArgs<'_>) -> Result<(), String> {
    let factor = args
        .scalar(1)
        .and_then(|v| v.as_i64())
        .ok_or("argument 1 is not an integer")?;
    let data = args.buffer::<i32>(0).ok_or("argument 0 is not a buffer")?;
    let scaled: Vec<i32> = data.iter().map(|v| v * factor as i32).collect();
    args.write_buffer(0, &scaled);
    Ok(())
}

fn runtime() -> EmulatedRuntime {
    EmulatedRuntime::new()
        .with_kernel("scale", scale_kernel)
        .with_kernel("broken", |_: &mut KernelArgs<'_>| Err("stuck at 0".to_string()))
}

fn unused(
    _: Mmap<i32>,
    _: i64,
) {
}

/// Run `f` in a forked wrapper process and return its raw wait status.
fn in_wrapper(f: impl FnOnce()) -> libc::c_int {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0);
    if pid == 0 {
        let _ = panic::catch_unwind(AssertUnwindSafe(f));
        unsafe { libc::_exit(0) };
    }
    let mut status = 0;
    assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
    status
}

#[test]
fn test_simulation_runs_function_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let ns = invoke_hw(
        &runtime(),
        true,
        move |n: u32| {
            counter.fetch_add(n as usize, Ordering::SeqCst);
        },
        None,
        (1u32,),
    )
    .unwrap();
    assert!(ns >= 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_simulation_mutates_shared_buffer() {
    let buf = Mmap::read_write(&[1i32, 2, 3]).unwrap();
    let ns = invoke_hw(
        &runtime(),
        false,
        |data: Mmap<i32>, k: i64| data.with_mut(|d| d.iter_mut().for_each(|v| *v *= k as i32)),
        Some(Path::new("")),
        (buf.clone(), 10i64),
    )
    .unwrap();
    assert!(ns >= 0);
    assert_eq!(buf.to_vec(), vec![10, 20, 30]);
}

#[test]
fn test_in_process_device_run() {
    let buf = Mmap::read_write(&[4i32, 5]).unwrap();
    let ns = invoke_hw(&runtime(), false, unused, Some(Path::new("scale.xclbin")), (buf.clone(), 3i64))
        .unwrap();
    assert!(ns >= 0);
    assert_eq!(buf.to_vec(), vec![12, 15]);
}

#[test]
fn test_isolated_device_run_publishes_results() {
    let buf = Mmap::read_write(&[-1i32, 7, 9]).unwrap();
    let ns = invoke_hw(&runtime(), true, unused, Some(Path::new("bits/scale.awsxclbin")), (buf.clone(), 2i64))
        .unwrap();
    assert!(ns >= 0);
    assert_eq!(buf.to_vec(), vec![-2, 14, 18]);
}

#[test]
fn test_in_process_kernel_failure_is_returned() {
    let buf = Mmap::read_write(&[1i32]).unwrap();
    let err = invoke_hw(&runtime(), false, unused, Some(Path::new("broken.xclbin")), (buf, 1i64))
        .unwrap_err();
    assert!(matches!(err, InvokeError::Device(DeviceError::Kernel(ref msg)) if msg == "stuck at 0"));
}

#[test]
fn test_in_process_unknown_bitstream_is_returned() {
    let err = invoke_hw(&runtime(), false, |_: u8| {}, Some(Path::new("missing.xclbin")), (0u8,))
        .unwrap_err();
    assert!(matches!(err, InvokeError::Device(DeviceError::UnknownBitstream(_))));
}

#[test]
fn test_isolated_failure_aborts_caller() {
    let status = in_wrapper(|| {
        let buf = Mmap::read_write(&[1i32]).unwrap();
        let _ = invoke_hw(&runtime(), true, unused, Some(Path::new("broken.xclbin")), (buf, 1i64));
    });
    assert!(libc::WIFSIGNALED(status));
    assert_eq!(libc::WTERMSIG(status), libc::SIGABRT);
}

#[test]
fn test_isolated_unknown_bitstream_aborts_caller() {
    let status = in_wrapper(|| {
        let _ = invoke_hw(&runtime(), true, |_: u8| {}, Some(Path::new("nope.bit")), (0u8,));
    });
    assert!(libc::WIFSIGNALED(status));
    assert_eq!(libc::WTERMSIG(status), libc::SIGABRT);
}

#[test]
fn test_arguments_bound_in_parameter_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let rt = EmulatedRuntime::new().with_kernel("regs", move |args: &mut KernelArgs<'_>| {
        let scalars: Vec<Option<ScalarValue>> = (0..args.len()).map(|i| args.scalar(i)).collect();
        sink.lock().unwrap().extend(scalars);
        Ok(())
    });
    invoke_hw(
        &rt,
        false,
        |_: u64, _: i8, _: f64, _: bool| {},
        Some(Path::new("regs.xclbin")),
        (Seq::starting_at(5), -3i8, 0.5f64, true),
    )
    .unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            Some(ScalarValue::U64(5)),
            Some(ScalarValue::I8(-3)),
            Some(ScalarValue::F64(0.5)),
            Some(ScalarValue::Bool(true)),
        ]
    );
}
