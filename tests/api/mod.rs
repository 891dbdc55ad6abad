mod health_tests;
mod member_tests;
mod message_tests;
mod server_tests;
mod stream_tests;
mod user_tests;
