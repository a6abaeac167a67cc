// SQLite schema definitions
// Mirrors schema.rs without the `alerts` schema qualifier.

diesel::table! {
    channels (id) {
        id -> Integer,
        server_id -> Text,
        channel_id_input -> Text,
        channel_id_output -> Text,
        channel_type -> Text,
    }
}

diesel::table! {
    roles (id) {
        id -> Integer,
        server_id -> Text,
        role_id -> Text,
        role_type -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(channels, roles);
