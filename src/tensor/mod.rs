pub mod dim_vector;
