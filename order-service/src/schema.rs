diesel::table! {
    orders (id) {
        id -> Uuid,
        user_id -> Int8,
        total -> Numeric,
        items -> Jsonb,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
