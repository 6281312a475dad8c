pub mod query_gate;
