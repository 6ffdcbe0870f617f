//! External collaborators the coordinator drives: the uploader that pushes a
//! file to remote storage and the probe that checks a reference URL is still
//! alive. Both sit behind traits so tests can swap in fakes.

pub mod probe;
pub mod uploader;
