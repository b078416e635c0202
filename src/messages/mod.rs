// Wire protocol: framing, frontend message decoding, backend frame builders.

pub mod constants;
pub mod frontend;
pub mod protocol;
pub mod socket;

pub use frontend::{BindPayload, FrontendMessage};
pub use protocol::{
    authentication_ok, backend_key_data, bind_complete, close_complete, command_complete,
    copy_data, copy_done, copy_in_response, copy_out_response, data_row, empty_query_response,
    error_response, no_data, notice_response, parameter_description, parameter_status,
    parse_complete, portal_suspended, ready_for_query, row_description, FieldDescription,
};
pub use socket::{
    flush, read_message, read_startup_message, write_all, write_all_flush, MAX_MESSAGE_SIZE,
};
