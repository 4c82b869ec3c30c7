//! Handwritten Diesel schema declarations used by model structs.
//!
//! Migrations define the actual tables and constraints. This module only
//! provides `diesel::table!` declarations so we can derive
//! Insertable/Queryable in a type-safe way without running
//! `diesel print-schema`.

diesel::table! {
    readings (id) {
        id -> Integer,
        timestamp -> TimestamptzSqlite,
        rpm -> Nullable<Integer>,
        speed_mph -> Nullable<Double>,
        coolant_temp_f -> Nullable<Double>,
        throttle_pct -> Nullable<Double>,
        load_pct -> Nullable<Double>,
        maf_gps -> Nullable<Double>,
    }
}

diesel::table! {
    trips (id) {
        id -> Integer,
        started_at -> TimestamptzSqlite,
        ended_at -> Nullable<TimestamptzSqlite>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(readings, trips);
