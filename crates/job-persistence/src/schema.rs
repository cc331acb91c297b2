// Esquema Diesel compartido por SQLite y Postgres.
// Tablas: jobs, job_jdls, logging_info
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    jobs (job_id) {
        job_id -> BigInt,
        status -> Text,
        minor_status -> Text,
        application_status -> Text,
        owner -> Text,
        owner_group -> Text,
        vo -> Text,
        submission_time_us -> BigInt,
        last_update_time_us -> BigInt,
        start_exec_time_us -> Nullable<BigInt>,
        end_exec_time_us -> Nullable<BigInt>,
        heart_beat_time_us -> Nullable<BigInt>,
    }
}
diesel::table! {
    job_jdls (job_id) {
        job_id -> BigInt,
        jdl -> Text,
    }
}
diesel::table! {
    logging_info (job_id, seq_num) {
        job_id -> BigInt,
        seq_num -> BigInt,
        status -> Nullable<Text>,
        minor_status -> Nullable<Text>,
        application_status -> Nullable<Text>,
        status_time_us -> BigInt,
        status_time_order -> Double,
        status_source -> Text,
    }
}
allow_tables_to_appear_in_same_query!(jobs, job_jdls, logging_info);
