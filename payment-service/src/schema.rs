diesel::table! {
    payments (id) {
        id -> Uuid,
        order_id -> Uuid,
        user_id -> Int8,
        method -> Varchar,
        amount -> Numeric,
        status -> Varchar,
        success -> Bool,
        card_number -> Nullable<Varchar>,
        external_id -> Varchar,
        metadata -> Nullable<Jsonb>,
        failure_reason -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}
