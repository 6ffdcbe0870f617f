pub mod command_handlers;
