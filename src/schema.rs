diesel::table! {
    emails (id) {
        id -> BigInt,
        sender -> Text,
        recipient -> Text,
        subject -> Text,
        body -> Text,
        is_sent -> Bool,
        opened -> Bool,
        created_at -> Timestamp,
        sent_at -> Nullable<Timestamp>,
        opened_at -> Nullable<Timestamp>,
    }
}
