// Diesel table definitions, kept in step with `schema.rs`.

diesel::table! {
    accounts (id) {
        id -> Text,
        role -> Text,
        store_id -> Nullable<Text>,
        display_name -> Nullable<Text>,
        linked_participant_id -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    caregiver_links (caregiver_id, participant_id) {
        caregiver_id -> Text,
        participant_id -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    wallets (account_id) {
        account_id -> Text,
        honor_balance -> BigInt,
        local_balance -> BigInt,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    point_transactions (id) {
        id -> Text,
        account_id -> Text,
        kind -> Text,
        amount -> BigInt,
        honor_delta -> BigInt,
        local_delta -> BigInt,
        description -> Text,
        match_id -> Nullable<Text>,
        operator_id -> Nullable<Text>,
        store_id -> Nullable<Text>,
        created_at -> Text,
        seq -> BigInt,
    }
}

diesel::table! {
    matches (id) {
        id -> Text,
        store_id -> Text,
        status -> Text,
        winner -> Nullable<Text>,
        red_total -> BigInt,
        yellow_total -> BigInt,
        credit_status -> Text,
        recorded_by -> Nullable<Text>,
        created_at -> Text,
        completed_at -> Nullable<Text>,
        updated_at -> Text,
        deleted_at -> Nullable<Text>,
    }
}

diesel::table! {
    match_participants (match_id, account_id) {
        match_id -> Text,
        account_id -> Text,
        team -> Text,
        result -> Text,
        award -> BigInt,
    }
}

diesel::table! {
    match_rounds (match_id, round_index) {
        match_id -> Text,
        round_index -> Integer,
        red_score -> Integer,
        yellow_score -> Integer,
        evidence_ref -> Text,
    }
}

diesel::table! {
    match_audit (id) {
        id -> Text,
        match_id -> Text,
        action -> Text,
        actor -> Nullable<Text>,
        detail_json -> Text,
        created_at -> Text,
    }
}

diesel::joinable!(wallets -> accounts (account_id));
diesel::joinable!(point_transactions -> wallets (account_id));
diesel::joinable!(match_participants -> matches (match_id));
diesel::joinable!(match_rounds -> matches (match_id));
diesel::joinable!(match_audit -> matches (match_id));

diesel::allow_tables_to_appear_in_same_query!(
    accounts,
    caregiver_links,
    wallets,
    point_transactions,
    matches,
    match_participants,
    match_rounds,
    match_audit,
);
