mod common;
mod deps_tests;
mod freeze_tests;
mod hash_tests;
mod record_tests;
