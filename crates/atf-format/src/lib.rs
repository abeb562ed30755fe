//! On-disk and on-wire document formats: the per-directory manifest, the
//! per-program test case listing, the per-case result file, and the
//! top-level transcript.

pub mod atffile;
pub mod tcresult;
pub mod tplist;
pub mod transcript;

pub use atffile::{read_manifest, Manifest, TpSpec};
pub use tcresult::{read_tc_result, write_tc_result};
pub use tplist::read_tp_list;
pub use transcript::TranscriptWriter;
