mod fake_code;
mod safety;
mod string_encrypt;
