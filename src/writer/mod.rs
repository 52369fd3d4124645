//! Writers that turn a byte stream into resumable upload chunks.
//!
//! A typical chain is `ChunkSplitter -> ResumableWriter`: the splitter
//! regroups whatever `io::copy` hands it into aligned chunks and the
//! uploader sends each of them through the session.

use std::io;

pub mod splitter;
pub mod uploader;

pub trait ChainWrite<W: io::Write>: io::Write {
    fn next_writer(&mut self) -> &mut W;
    fn next(self) -> W;
}

#[macro_export(local_inner_macros)]
macro_rules! take_nth_writer {
    ($w:ident $($tails:tt)*) => {
        take_nth_writer!(@next($crate::writer::ChainWrite::next($w)) $($tails)*)
    };
    (@next($($x:tt)*) > $($tails:tt)*) => {
        take_nth_writer!(@next($crate::writer::ChainWrite::next($($x)*)) $($tails)*)
    };
    (@next($($x:tt)*)) => {
        $($x)*
    };
}
pub use take_nth_writer;
