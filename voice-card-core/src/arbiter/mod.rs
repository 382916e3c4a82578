pub mod source_arbiter;
