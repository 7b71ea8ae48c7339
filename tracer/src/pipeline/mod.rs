mod post_process;
mod ray_tracing;

pub use self::{post_process::*, ray_tracing::*};
