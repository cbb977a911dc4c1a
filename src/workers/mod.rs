pub mod intent_monitor;
