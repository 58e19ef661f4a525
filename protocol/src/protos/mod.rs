pub mod generated {
    include!(concat!(env!("OUT_DIR"), "/generated/mod.rs"));
}
