pub mod boundary;
pub mod descriptor;
pub mod stencil;
pub mod storage;
