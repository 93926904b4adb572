//! AFL fuzz target for `MessageBuffer` wire parsing.
//!
//! Reads test cases from standard input and feeds them to
//! [`MessageBuffer::read_from`] in a loop compatible with AFL's persistent
//! mode. Malformed input is an expected `Err`, not a crash; this target
//! exists to catch panics and out-of-bounds reads in the frame-header and
//! padding arithmetic (spec.md §4.1), not to assert acceptance.
unsafe extern "C" {
    fn __AFL_LOOP(cnt: u32) -> i32;
}
use std::io::{self, Read};

use dispatchd::buffer::MessageBuffer;

/// Generous upper bound on one test case so a crash doesn't grow memory use
/// without bound across AFL's persistent-mode iterations.
const MAX_INPUT_LEN: u64 = 1 << 20;

fn main() {
    let mut data = Vec::with_capacity(MAX_INPUT_LEN as usize);
    loop {
        if unsafe { __AFL_LOOP(1000) } == 0 {
            break;
        }
        data.clear();
        if io::stdin().take(MAX_INPUT_LEN).read_to_end(&mut data).is_err() {
            return;
        }

        // A well-formed buffer must round-trip; a malformed one must return
        // an error rather than panic.
        if let Ok(buffer) = MessageBuffer::read_from(&data) {
            let _ = buffer.write_to();
        }
    }
}
