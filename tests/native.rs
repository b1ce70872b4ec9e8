#![cfg(unix)]

use std::ffi::CString;
use std::io::Write;
use std::panic;
use std::process::Command;

use stdcap::{Error, capture, capture_native, capture_native_with, limits};

// Descriptor 1 is shared with libtest, which prints a status line whenever a
// test finishes. Running every scenario from one test keeps those lines out of
// the capture windows.
#[test]
fn native_capture() {
    rust_and_c_output_in_order();
    no_descriptor_leak_under_lowered_limit();
    panic_is_propagated_and_descriptors_restored();
    huge_output_does_not_deadlock();
    noop_captures_leak_nothing();
    nesting_rules();
    child_processes_inherit_the_pipe();
    concurrent_callers_get_their_own_marker();
    descriptors_are_usable_afterwards();
}

fn c_puts(s: &str) {
    let line = CString::new(s).unwrap();
    unsafe {
        libc::puts(line.as_ptr());
    }
}

fn rust_then_c() -> stdcap::CapturedOutput {
    capture_native(|| {
        std::io::stdout().write_all(b"Rust\n").unwrap();
        c_puts("C");
    })
    .unwrap()
}

fn rust_and_c_output_in_order() {
    assert_eq!(rust_then_c(), "Rust\nC\n");
}

fn no_descriptor_leak_under_lowered_limit() {
    limits::with_open_file_limit(10, |limit| {
        for _ in 0..=limit {
            assert_eq!(rust_then_c(), "Rust\nC\n");
        }
    })
    .unwrap();
}

fn panic_is_propagated_and_descriptors_restored() {
    limits::with_open_file_limit(10, |limit| {
        for _ in 0..=limit {
            let result = panic::catch_unwind(|| {
                let _ = capture_native(|| {
                    std::io::stdout().write_all(b"abc\n").unwrap();
                    panic!("stop");
                });
            });
            let payload = result.unwrap_err();
            assert_eq!(payload.downcast_ref::<&str>(), Some(&"stop"));
        }
    })
    .unwrap();

    assert_eq!(rust_then_c(), "Rust\nC\n");
}

fn huge_output_does_not_deadlock() {
    let line = format!("{}\n", "a".repeat(1023));
    let output = capture_native(|| {
        let mut stdout = std::io::stdout();
        for _ in 0..1024 {
            stdout.write_all(line.as_bytes()).unwrap();
        }
    })
    .unwrap();
    assert_eq!(output.len(), 1024 * 1024);

    let output = capture_native(|| {
        for _ in 0..1024 {
            c_puts(&"c".repeat(1023));
        }
    })
    .unwrap();
    assert_eq!(output.len(), 1024 * 1024);
}

fn noop_captures_leak_nothing() {
    let before = limits::open_descriptor_count().unwrap();
    for _ in 0..32 {
        assert!(capture_native(|| {}).unwrap().is_empty());
    }
    assert_eq!(limits::open_descriptor_count().unwrap(), before);
}

fn nesting_rules() {
    // Native inside native is refused; the outer capture carries on.
    let output = capture_native(|| {
        let nested = capture_native(|| {});
        assert!(matches!(nested, Err(Error::NestedCapture)), "{:?}", nested);
        std::io::stdout().write_all(b"outer\n").unwrap();
    })
    .unwrap();
    assert_eq!(output, "outer\n");

    // Native inside managed is refused as well.
    let output = capture(|| {
        let nested = capture_native(|| {});
        assert!(matches!(nested, Err(Error::NestedCapture)), "{:?}", nested);
    })
    .unwrap();
    assert!(output.is_empty());

    // Managed inside native takes the handle writes for itself.
    let output = capture_native(|| {
        stdcap::stdout().write_all(b"1").unwrap();
        let inner = capture(|| stdcap::stdout().write_all(b"2").unwrap()).unwrap();
        assert_eq!(inner, "2");
        stdcap::stderr().write_all(b"3").unwrap();
    })
    .unwrap();
    assert_eq!(output, "13");
}

fn child_processes_inherit_the_pipe() {
    let (status, output) = capture_native_with(|| {
        Command::new("sh")
            .args(["-c", "echo child; echo oops 1>&2"])
            .status()
    })
    .unwrap();
    assert!(status.unwrap().success());
    assert_eq!(output, "child\noops\n");
}

fn concurrent_callers_get_their_own_marker() {
    let handles: Vec<_> = (0..50)
        .map(|i| {
            std::thread::spawn(move || {
                let marker = format!("thread-{}", i);
                let output = capture_native(|| {
                    writeln!(std::io::stdout(), "{}", marker).unwrap();
                    c_puts("C");
                });
                (marker, output)
            })
        })
        .collect();

    for handle in handles {
        let (marker, output) = handle.join().unwrap();
        assert_eq!(output.unwrap().to_string_lossy(), format!("{}\nC\n", marker));
    }
}

fn descriptors_are_usable_afterwards() {
    for fd in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        assert_ne!(unsafe { libc::fcntl(fd, libc::F_GETFD) }, -1, "fd {} closed", fd);
    }
    assert!(!stdcap::stdout().is_captured());
}
